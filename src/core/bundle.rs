use crate::domain::model::Artifact;
use crate::utils::error::Result;
use std::io::Write;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Path inside the bundle, the install path without its leading `/`, so the
/// archive can be unpacked at the host's root.
pub fn entry_name(artifact: &Artifact) -> String {
    artifact.install_path().trim_start_matches('/').to_string()
}

/// Zips the artifacts with a fixed timestamp so identical input gives an
/// identical archive.
pub fn bundle(artifacts: &[Artifact]) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for artifact in artifacts {
        let name = entry_name(artifact);
        tracing::debug!("Adding {} to bundle", name);
        zip.start_file(name, options)?;
        zip.write_all(artifact.contents.as_bytes())?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ArtifactKind;
    use std::io::Read;

    fn artifacts() -> Vec<Artifact> {
        vec![
            Artifact {
                kind: ArtifactKind::SocketUnit,
                file_name: "blog.socket".to_string(),
                install_dir: "/etc/systemd/system".to_string(),
                contents: "[Socket]\nListenStream=/run/blog.sock\n".to_string(),
            },
            Artifact {
                kind: ArtifactKind::Requirements,
                file_name: "requirements.txt".to_string(),
                install_dir: "/home/deploy/blog".to_string(),
                contents: "gunicorn==21.2.0\n".to_string(),
            },
        ]
    }

    #[test]
    fn test_bundle_lays_out_install_paths() {
        let data = bundle(&artifacts()).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();

        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["etc/systemd/system/blog.socket", "home/deploy/blog/requirements.txt"]
        );

        let mut content = String::new();
        archive
            .by_name("etc/systemd/system/blog.socket")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "[Socket]\nListenStream=/run/blog.sock\n");
    }

    #[test]
    fn test_bundle_is_reproducible() {
        assert_eq!(bundle(&artifacts()).unwrap(), bundle(&artifacts()).unwrap());
    }
}
