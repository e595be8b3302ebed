use anyhow::{bail, Context, Result};
use bcp_bazel::{
    aggregate_jar_files, bazel_workspace_root, detect_version, AspectOptions, BazelWorkspace,
    CancellationToken, DefaultCommandRunner, ExecutorOptions, Label, ToolVersion,
    DEFAULT_ASPECT_LABEL,
};
use bcp_classpath::{
    ClasspathEngine, ClasspathEntry, ClasspathResult, ProjectDefinition, ProjectIndex, SourceRoot,
};
use bcp_config::{init_tracing, load_for_workspace, BcpConfig, StrategyKind};
use bcp_project::{PackageLocation, StrategyRegistry};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Parser)]
#[command(
    name = "bcp",
    version,
    about = "Bazel Java classpaths (classpath, structure, test-classpath, params, version)"
)]
struct Cli {
    /// Bazel workspace root (defaults to the workspace containing the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve the classpath of targets or of a configured project
    Classpath(ClasspathArgs),
    /// Jars of external repositories and generated jars in the workspace
    Libraries(JsonArgs),
    /// Configured projects, dependents before their dependencies
    Projects(JsonArgs),
    /// Java rules declared in packages
    Targets(TargetsArgs),
    /// Source layout of a package
    Structure(StructureArgs),
    /// Runtime classpath of tests, read from their params files
    TestClasspath(TestClasspathArgs),
    /// Aggregate the jars listed in params files
    Params(ParamsArgs),
    /// Print the detected Bazel version
    Version(JsonArgs),
}

#[derive(Args)]
struct JsonArgs {
    /// Emit JSON suitable for scripting
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ClasspathArgs {
    /// Targets to resolve, e.g. `//app:app` or `//app/...`
    labels: Vec<String>,
    /// Resolve a project from `[[projects]]` instead of a target list
    #[arg(long, conflicts_with = "labels")]
    project: Option<String>,
    /// Emit JSON suitable for scripting
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TargetsArgs {
    /// Packages to list, e.g. `//app` or `//app:all`
    #[arg(required = true)]
    packages: Vec<String>,
    /// Emit JSON suitable for scripting
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StructureArgs {
    /// Workspace-relative package path (`//` prefix optional)
    package: String,
    /// Emit JSON suitable for scripting
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TestClasspathArgs {
    /// Test target or wildcard (`tests(<target>)` is queried)
    target: String,
    /// Fully-qualified test class to narrow the lookup to
    #[arg(long = "class")]
    test_class: Option<String>,
    /// Read source-jar params files instead of binary ones
    #[arg(long)]
    sources: bool,
    /// Emit JSON suitable for scripting
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ParamsArgs {
    /// Params files to read
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Keep `*_deploy.jar` aggregates
    #[arg(long)]
    include_deploy_jars: bool,
    /// Emit JSON suitable for scripting
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let cancel = CancellationToken::new();
    match cli.command {
        Command::Params(args) => {
            let jars = aggregate_jar_files(&args.files, args.include_deploy_jars);
            print_lines(&jars, args.json)?;
            Ok(0)
        }
        Command::Version(args) => {
            let root = workspace_root(cli.workspace.as_deref())?;
            let config = load_config(&root)?;
            let runner = runner(&config)?;
            let version = detect_version(&runner, &root, &config.bazel.executable, &cancel);
            if args.json {
                print_json(&VersionReport {
                    executable: &config.bazel.executable,
                    version,
                })?;
            } else {
                println!("{}: {version}", config.bazel.executable);
            }
            Ok(if matches!(version, ToolVersion::Known(_)) { 0 } else { 1 })
        }
        Command::Structure(args) => {
            let session = Session::open(cli.workspace.as_deref())?;
            let structure = &session.config.structure;
            let registry = StrategyRegistry::standard(
                structure.test_folder_markers.clone(),
                structure.is_enabled(StrategyKind::Maven),
            );
            let package = args.package.trim_start_matches("//").trim_end_matches('/');
            let location = PackageLocation::new(session.workspace.root(), package);
            let Some(layout) = registry.determine(&location, &*session.workspace, &cancel)? else {
                bail!("could not determine the source layout of //{package}");
            };
            if args.json {
                print_json(&layout)?;
            } else {
                for dir in &layout.main_source_dirs {
                    println!("main: {dir}");
                }
                for dir in &layout.test_source_dirs {
                    println!("test: {dir}");
                }
            }
            Ok(0)
        }
        Command::TestClasspath(args) => {
            let session = Session::open(cli.workspace.as_deref())?;
            let target = parse_label(&args.target)?;
            let found = match &args.test_class {
                Some(class) => session.workspace.find_params_file_for_test_class(
                    class,
                    &target,
                    args.sources,
                    &cancel,
                )?,
                None => session.workspace.find_params_files_for_targets(
                    std::slice::from_ref(&target),
                    args.sources,
                    &cancel,
                )?,
            };
            let jars = aggregate_jar_files(
                &found.params_files,
                session.config.classpath.include_deploy_jars,
            );
            if args.json {
                print_json(&TestClasspathReport {
                    jars: &jars,
                    unrunnable: &found.unrunnable,
                })?;
            } else {
                print_lines(&jars, false)?;
                for test in &found.unrunnable {
                    eprintln!("unrunnable: {test}");
                }
            }
            Ok(0)
        }
        Command::Classpath(args) => {
            let engine = Session::open(cli.workspace.as_deref())?.engine()?;
            let result = match &args.project {
                Some(project) => engine.project_classpath(project, &cancel)?,
                None => {
                    if args.labels.is_empty() {
                        bail!("expected at least one target label or --project");
                    }
                    let targets = args
                        .labels
                        .iter()
                        .map(|label| parse_label(label))
                        .collect::<Result<Vec<_>>>()?;
                    engine.target_classpath(&targets, &cancel)?
                }
            };
            print_classpath(&result, args.json)?;
            Ok(if result.complete { 0 } else { 1 })
        }
        Command::Libraries(args) => {
            let engine = Session::open(cli.workspace.as_deref())?.engine()?;
            let result = engine.workspace_libraries(&cancel)?;
            print_classpath(&result, args.json)?;
            Ok(0)
        }
        Command::Projects(args) => {
            let engine = Session::open(cli.workspace.as_deref())?.engine()?;
            let order = engine.deletion_order(&cancel)?;
            print_lines(&order, args.json)?;
            Ok(0)
        }
        Command::Targets(args) => {
            let packages = args
                .packages
                .iter()
                .map(|package| parse_label(package))
                .collect::<Result<Vec<_>>>()?;
            let engine = Session::open(cli.workspace.as_deref())?.engine()?;
            let targets: Vec<String> = engine
                .java_targets_in_packages(&packages, &cancel)?
                .iter()
                .map(ToString::to_string)
                .collect();
            print_lines(&targets, args.json)?;
            Ok(0)
        }
    }
}

struct Session {
    config: BcpConfig,
    workspace: Arc<BazelWorkspace<DefaultCommandRunner>>,
}

impl Session {
    fn open(workspace: Option<&Path>) -> Result<Self> {
        let root = workspace_root(workspace)?;
        let config = load_config(&root)?;
        let bazel = &config.bazel;
        let workspace = BazelWorkspace::new(root, runner(&config)?)?
            .with_executable(bazel.executable.clone())
            .with_aspect_options(AspectOptions {
                directory: bazel.aspect_directory.clone(),
                label: bazel
                    .aspect_label
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ASPECT_LABEL.to_string()),
            })
            .with_params_cache_ttl(config.classpath.params_cache_ttl())
            .with_test_source_dirs(config.structure.test_source_dirs.clone());
        Ok(Self {
            config,
            workspace: Arc::new(workspace),
        })
    }

    fn engine(self) -> Result<ClasspathEngine<DefaultCommandRunner>> {
        let projects = self
            .config
            .projects
            .iter()
            .map(|project| -> Result<ProjectDefinition> {
                let targets = project
                    .targets
                    .iter()
                    .map(|target| parse_label(target))
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("project `{}`", project.name))?;
                let mut definition = ProjectDefinition::new(&project.name, targets);
                for root in &project.source_roots {
                    let mut source_root = SourceRoot::new(&root.path);
                    for pattern in &root.include {
                        source_root = source_root.with_include(pattern);
                    }
                    for pattern in &root.exclude {
                        source_root = source_root.with_exclude(pattern);
                    }
                    definition = definition.with_source_root(source_root);
                }
                Ok(definition)
            })
            .collect::<Result<Vec<_>>>()?;

        let engine = ClasspathEngine::new(self.workspace, ProjectIndex::new(projects)?)?
            .with_external_repository_filter(&self.config.classpath.external_repository_filter)?
            .with_explicit_java_test_deps(self.config.bazel.explicit_java_test_deps);
        Ok(engine)
    }
}

fn workspace_root(explicit: Option<&Path>) -> Result<PathBuf> {
    let start = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("failed to read the current directory")?,
    };
    Ok(bazel_workspace_root(&start).unwrap_or(start))
}

fn load_config(root: &Path) -> Result<BcpConfig> {
    let (config, path) = load_for_workspace(root)?;
    init_tracing(&config.logging);
    if let Some(path) = path {
        tracing::debug!(target = "bcp.cli", path = %path.display(), "loaded config");
    }
    Ok(config)
}

fn runner(config: &BcpConfig) -> Result<DefaultCommandRunner> {
    let bazel = &config.bazel;
    let runner = DefaultCommandRunner::new(ExecutorOptions {
        shell_wrapping: bazel.shell_wrapping(),
        env: bazel
            .env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        timeout: bazel.timeout(),
        max_output_bytes: bazel.max_output_bytes,
    })?;
    Ok(runner)
}

fn parse_label(text: &str) -> Result<Label> {
    Label::parse(text).with_context(|| format!("invalid label `{text}`"))
}

#[derive(Serialize)]
struct VersionReport<'a> {
    executable: &'a str,
    version: ToolVersion,
}

#[derive(Serialize)]
struct TestClasspathReport<'a> {
    jars: &'a [String],
    unrunnable: &'a BTreeSet<String>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn print_lines(lines: &[String], json: bool) -> Result<()> {
    if json {
        return print_json(&lines);
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn print_classpath(result: &ClasspathResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }

    for entry in &result.entries {
        let scope = if entry.is_test_only() { " (test)" } else { "" };
        match entry {
            ClasspathEntry::Library(library) => match &library.source_jar {
                Some(source_jar) => println!(
                    "{}{scope} [sources: {}]",
                    library.jar.display(),
                    source_jar.display()
                ),
                None => println!("{}{scope}", library.jar.display()),
            },
            ClasspathEntry::Project(project) => println!("project:{}{scope}", project.name),
        }
    }
    if !result.complete {
        eprintln!("warning: some targets produced no aspect output");
    }
    if result.missing.found_missing_jars {
        eprintln!(
            "warning: {} jar(s) missing; build the targets and retry",
            result.missing.missing_jar_count
        );
    }
    Ok(())
}
