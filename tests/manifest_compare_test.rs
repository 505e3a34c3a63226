use anyhow::Result;
use stack_deploy::core::manifest::{compare, parse_requirements, validate_pins};
use tempfile::TempDir;

/// A laptop freeze and a host freeze resolve to the same package set
#[test]
fn test_dev_and_host_freeze_are_reproducible() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let dev_path = temp_dir.path().join("dev-requirements.txt");
    let host_path = temp_dir.path().join("host-requirements.txt");

    std::fs::write(
        &dev_path,
        "# pip freeze on laptop\nasgiref==3.7.2\nDjango==4.2.7\ngunicorn==21.2.0\nsqlparse==0.4.4\n",
    )?;
    std::fs::write(
        &host_path,
        "sqlparse==0.4.4\ndjango==4.2.7\nasgiref==3.7.2\ngunicorn==21.2.0\n",
    )?;

    let dev = parse_requirements(&std::fs::read_to_string(&dev_path)?)?;
    let host = parse_requirements(&std::fs::read_to_string(&host_path)?)?;

    assert!(validate_pins(&dev).is_empty());
    let diff = compare(&dev, &host);
    assert!(diff.is_reproducible());
    assert_eq!(diff.render_text(), "✅ Manifests resolve to the same package set\n");

    Ok(())
}

#[test]
fn test_host_drift_is_reported_as_json() -> Result<()> {
    let dev = parse_requirements("Django==4.2.7\ngunicorn==21.2.0\n")?;
    let host = parse_requirements("Django==4.2.8\ngunicorn==21.2.0\nwhitenoise==6.6.0\n")?;

    let diff = compare(&dev, &host);
    assert!(!diff.is_reproducible());

    let json = serde_json::to_value(&diff)?;
    assert_eq!(json["only_left"], serde_json::json!([]));
    assert_eq!(json["only_right"], serde_json::json!(["whitenoise"]));
    assert_eq!(
        json["version_mismatch"],
        serde_json::json!([{ "name": "django", "left": "==4.2.7", "right": "==4.2.8" }])
    );

    Ok(())
}

#[test]
fn test_range_specifiers_never_count_as_reproducible_pins() -> Result<()> {
    let requirements = parse_requirements("Django~=4.2\ngunicorn==21.2.0\n")?;
    let findings = validate_pins(&requirements);
    assert_eq!(findings.len(), 1);
    assert!(findings[0].message.contains("Django~=4.2"));
    Ok(())
}
