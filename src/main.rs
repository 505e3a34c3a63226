use clap::Parser;
use stack_deploy::config::{CheckArgs, Command, CompareArgs, Overrides, PlanArgs, RenderArgs};
use stack_deploy::core::manifest::{compare, parse_requirements};
use stack_deploy::domain::model::DeploymentNames;
use stack_deploy::utils::logger;
use stack_deploy::{
    ArtifactSet, CliConfig, ConsistencyChecker, DeployConfig, DeployError, LocalStorage, Plan,
    RenderEngine, RenderOptions, Result,
};
use std::path::Path;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    if cli.log_json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting stack-deploy");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    match run(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!(
                "❌ stack-deploy failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(e.exit_code());
        }
    }
}

/// `Ok(false)` means the command ran but found a problem worth a failing exit.
async fn run(command: Command) -> Result<bool> {
    match command {
        Command::Render(args) => render(args).await,
        Command::Check(args) => check(args).await,
        Command::Plan(args) => plan(args),
        Command::Compare(args) => compare_manifests(args),
    }
}

fn load_names(path: &Path, overrides: &Overrides) -> Result<DeploymentNames> {
    tracing::info!("📁 Loading configuration from: {}", path.display());
    let mut config = DeployConfig::from_file(path)?;
    overrides.apply(&mut config);
    let names = config.resolve()?;
    tracing::info!("✅ Configuration loaded and validated successfully");
    Ok(names)
}

async fn render(args: RenderArgs) -> Result<bool> {
    let names = load_names(&args.config, &args.overrides)?;
    display_config_summary(&names, &args);

    let storage = LocalStorage::new(&args.output_dir);
    let engine = RenderEngine::with_options(
        storage,
        RenderOptions {
            force: args.force,
            bundle: args.bundle.clone(),
        },
    );

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - nothing will be written");
        for artifact in engine.render_all(&names)? {
            println!("==> {} ({})", artifact.install_path(), artifact.kind);
            println!("{}", artifact.contents);
        }
        println!("📋 Operator plan:");
        print!("{}", Plan::for_names(&names));
        return Ok(true);
    }

    let written = engine.run(&names).await?;
    println!("✅ Rendered {} files into {}", written.len(), args.output_dir.display());
    for file in &written {
        println!("  {}", file);
    }
    Ok(true)
}

async fn check(args: CheckArgs) -> Result<bool> {
    let expected = match &args.config {
        Some(path) => Some(load_names(path, &args.overrides)?),
        None => None,
    };
    let repo_name = match (&expected, &args.repo) {
        (Some(names), _) => names.repo_name.clone(),
        (None, Some(repo)) => repo.clone(),
        (None, None) => {
            return Err(DeployError::MissingConfigError {
                field: "--config or --repo".to_string(),
            })
        }
    };

    tracing::info!("🔍 Checking artifacts for {} in {}", repo_name, args.dir.display());
    let storage = LocalStorage::new(&args.dir);
    let set = ArtifactSet::load(&storage, &repo_name).await?;
    let report = ConsistencyChecker::new().check(&set, expected.as_ref());

    if args.json {
        println!("{}", report.render_json()?);
    } else {
        print!("{}", report.render_text());
    }

    if !report.is_ok() {
        tracing::error!("❌ {} consistency error(s)", report.errors().count());
    }
    Ok(report.is_ok())
}

fn plan(args: PlanArgs) -> Result<bool> {
    let names = load_names(&args.config, &args.overrides)?;
    print!("{}", Plan::for_names(&names));
    Ok(true)
}

fn compare_manifests(args: CompareArgs) -> Result<bool> {
    let left = parse_requirements(&std::fs::read_to_string(&args.left)?)?;
    let right = parse_requirements(&std::fs::read_to_string(&args.right)?)?;
    tracing::debug!("Comparing {} and {} requirements", left.len(), right.len());

    let diff = compare(&left, &right);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
    } else {
        print!("{}", diff.render_text());
    }
    Ok(diff.is_reproducible())
}

fn display_config_summary(names: &DeploymentNames, args: &RenderArgs) {
    println!("📋 Configuration Summary:");
    println!("  Repository: {}", names.repo_name);
    println!("  Project: {} ({})", names.project_name, names.wsgi_module());
    println!("  Working dir: {}", names.working_dir);
    println!("  Server names: {}", names.server_names.join(", "));
    println!("  Socket: {}", names.socket_path);
    println!("  Workers: {}", names.workers);
    println!("  Packages: {}", names.requirements.len());
    println!("  Output: {}", args.output_dir.display());

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}
