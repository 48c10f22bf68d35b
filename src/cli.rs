use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::{Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    asc::{
        AppStoreConnectClient,
        linkages::LinkagesQuery,
        types::{CiBuildRun, is_build_run_successful},
    },
    config::{Config, parse_duration},
    logging,
    output::{OutputFormat, print_list, print_one},
    util::{compare_runs_desc, pretty_run_status, resource_id, resource_name},
};

#[derive(Parser, Debug)]
#[command(name = "asc", version, about = "App Store Connect CLI in Rust", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive browser for products, workflows, branches, and runs
    Browse,
    /// List Xcode Cloud products
    Products,
    /// Show a product and its primary repository
    ProductInfo {
        /// CI Product ID
        #[arg(short, long)]
        product: String,
    },
    /// List workflows for a product
    Workflows {
        /// CI Product ID
        #[arg(short, long)]
        product: String,
    },
    /// Show a workflow and its repository linkage
    WorkflowInfo {
        /// CI Workflow ID
        #[arg(short, long)]
        workflow: String,
    },
    /// List branches of the repository behind a product
    Branches {
        /// CI Product ID (used to resolve repository)
        #[arg(short, long)]
        product: String,
    },
    /// Start a build run for workflow and branch
    BuildStart {
        /// CI Workflow ID
        #[arg(short, long)]
        workflow: String,
        /// SCM Git Reference ID of the branch
        #[arg(short, long)]
        branch: String,
        /// Wait for the run to complete
        #[arg(long)]
        wait: bool,
        /// Poll interval while waiting
        #[arg(long, default_value = "30s", value_parser = cli_duration)]
        poll_interval: Duration,
        /// Give up waiting after this long
        #[arg(long, default_value = "30m", value_parser = cli_duration)]
        timeout: Duration,
    },
    /// List build runs for a workflow, newest first
    Runs {
        /// CI Workflow ID
        #[arg(short, long)]
        workflow: String,
    },
    /// Show details for a build run
    RunInfo {
        /// CI Build Run ID
        #[arg(short = 'r', long = "run")]
        run_id: String,
    },
    /// Wait for a build run to complete
    Wait {
        /// CI Build Run ID
        #[arg(short = 'r', long = "run")]
        run_id: String,
        /// Poll interval
        #[arg(long, default_value = "30s", value_parser = cli_duration)]
        poll_interval: Duration,
        /// Give up after this long
        #[arg(long, default_value = "30m", value_parser = cli_duration)]
        timeout: Duration,
    },
    /// List actions of a build run
    Actions {
        /// CI Build Run ID
        #[arg(short = 'r', long = "run")]
        run_id: String,
    },
    /// List artifacts for a build run
    Artifacts {
        /// CI Build Run ID
        #[arg(short = 'r', long = "run")]
        run_id: String,
    },
    /// Download an artifact
    ArtifactDownload {
        /// CI Artifact ID
        #[arg(short, long)]
        artifact: String,
        /// Destination file (defaults to the artifact's file name)
        #[arg(long = "out")]
        out: Option<PathBuf>,
    },
    /// List test results for a build run
    TestResults {
        /// CI Build Run ID
        #[arg(short = 'r', long = "run")]
        run_id: String,
    },
    /// List apps
    Apps {
        /// Filter by bundle identifier
        #[arg(long)]
        bundle_id: Option<String>,
    },
    /// List builds of an app, newest first
    Builds {
        /// App ID (defaults to ASC_APP_ID)
        #[arg(short, long)]
        app: Option<String>,
        /// Return at most this many builds
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// List relationship linkages of a resource
    Linkages {
        /// Resource type, e.g. ciBuildRuns
        #[arg(long = "type")]
        resource: String,
        /// Resource ID
        #[arg(long)]
        id: String,
        /// Relationship name, e.g. actions
        #[arg(long)]
        relationship: String,
        /// Follow every page
        #[arg(long)]
        paginate: bool,
        /// Page size
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Print a short-lived App Store Connect bearer token
    Token,
}

fn cli_duration(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).map_err(|e| e.to_string())
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let cfg = Config::load().context("Failed to load configuration")?;
    let client = AppStoreConnectClient::new(&cfg).context("Failed to create App Store Connect client")?;

    let cancel = client.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            cancel.cancel();
        }
    });

    let out = cli.output;
    match cli.command.unwrap_or(Commands::Browse) {
        Commands::Browse => browse_flow(&client).await?,
        Commands::Products => list_products_cmd(&client, out).await?,
        Commands::ProductInfo { product } => product_info_cmd(&client, out, &product).await?,
        Commands::Workflows { product } => list_workflows_cmd(&client, out, &product).await?,
        Commands::WorkflowInfo { workflow } => workflow_info_cmd(&client, out, &workflow).await?,
        Commands::Branches { product } => list_branches_cmd(&client, out, &product).await?,
        Commands::BuildStart {
            workflow,
            branch,
            wait,
            poll_interval,
            timeout,
        } => {
            let run = start_build_cmd(&client, out, &workflow, &branch).await?;
            if wait {
                wait_cmd(&client, out, &run.id, poll_interval, timeout).await?;
            }
        }
        Commands::Runs { workflow } => list_runs_cmd(&client, out, &workflow).await?,
        Commands::RunInfo { run_id } => run_info_cmd(&client, out, &run_id).await?,
        Commands::Wait {
            run_id,
            poll_interval,
            timeout,
        } => wait_cmd(&client, out, &run_id, poll_interval, timeout).await?,
        Commands::Actions { run_id } => run_actions_cmd(&client, out, &run_id).await?,
        Commands::Artifacts { run_id } => run_artifacts_cmd(&client, out, &run_id).await?,
        Commands::ArtifactDownload { artifact, out: dest } => {
            artifact_download_cmd(&client, &artifact, dest).await?
        }
        Commands::TestResults { run_id } => run_test_results_cmd(&client, out, &run_id).await?,
        Commands::Apps { bundle_id } => list_apps_cmd(&client, out, bundle_id.as_deref()).await?,
        Commands::Builds { app, limit } => {
            let Some(app_id) = app.or_else(|| cfg.default_app_id.clone()) else {
                bail!("--app is required (or set ASC_APP_ID)");
            };
            list_builds_cmd(&client, out, &app_id, limit).await?
        }
        Commands::Linkages {
            resource,
            id,
            relationship,
            paginate,
            limit,
        } => linkages_cmd(&client, out, &resource, &id, &relationship, paginate, limit).await?,
        Commands::Token => print_token_cmd(&client).await?,
    }

    Ok(())
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(80));
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb
}

async fn list_products_cmd(client: &AppStoreConnectClient, out: OutputFormat) -> Result<()> {
    let pb = spinner("Loading products...");
    let products = client.list_ci_products().await;
    pb.finish_and_clear();
    print_list(out, &products?, "No Xcode Cloud products found", |p| {
        vec![resource_id(p).to_string(), resource_name(p)]
    })
}

async fn product_info_cmd(client: &AppStoreConnectClient, out: OutputFormat, product_id: &str) -> Result<()> {
    let product = client.get_ci_product(product_id).await?;
    print_one(out, &product, |p| {
        format!(
            "{}\t{}\t{}",
            p.id,
            resource_name(p),
            p.attributes.product_type.as_deref().unwrap_or("")
        )
    })?;
    match client.get_primary_repository_for_product(product_id).await? {
        Some(repo) => print_one(out, &repo, |r| format!("Primary repository: {}\t{}", r.id, resource_name(r)))?,
        None => eprintln!("No primary repository attached"),
    }
    Ok(())
}

async fn list_workflows_cmd(client: &AppStoreConnectClient, out: OutputFormat, product_id: &str) -> Result<()> {
    let pb = spinner("Loading workflows...");
    let workflows = client.list_workflows_for_product(product_id).await;
    pb.finish_and_clear();
    print_list(out, &workflows?, "No workflows found", |w| {
        let enabled = match w.attributes.is_enabled {
            Some(false) => "disabled",
            _ => "enabled",
        };
        vec![resource_id(w).to_string(), resource_name(w), enabled.to_string()]
    })
}

async fn workflow_info_cmd(client: &AppStoreConnectClient, out: OutputFormat, workflow_id: &str) -> Result<()> {
    let workflow = client.get_workflow(workflow_id).await?;
    print_one(out, &workflow, |w| format!("{}\t{}", w.id, resource_name(w)))?;
    match client.ci_workflow_repository_linkage(workflow_id).await {
        Ok(linkage) => match linkage.data {
            Some(repo) => println!("Repository: {}", repo.id),
            None => println!("Repository: (none)"),
        },
        Err(e) => eprintln!("Repository linkage lookup failed: {}", e),
    }
    Ok(())
}

async fn list_branches_cmd(client: &AppStoreConnectClient, out: OutputFormat, product_id: &str) -> Result<()> {
    let repo_id = {
        let pb = spinner("Resolving repository...");
        let r = client.resolve_repository_id_for_product(product_id).await;
        pb.finish_and_clear();
        r?
    };
    let Some(repo_id) = repo_id else {
        println!("No repositories attached to this product");
        return Ok(());
    };

    let pb = spinner("Loading branches...");
    let branches = client.list_branches_for_repository(&repo_id).await;
    pb.finish_and_clear();
    print_list(out, &branches?, "No branches found", |b| {
        vec![resource_id(b).to_string(), resource_name(b)]
    })
}

async fn start_build_cmd(
    client: &AppStoreConnectClient,
    out: OutputFormat,
    workflow_id: &str,
    branch_id: &str,
) -> Result<CiBuildRun> {
    let pb = spinner("Starting build run...");
    let run = client.start_build_run(workflow_id, branch_id).await;
    pb.finish_and_clear();
    let run = run.context("Failed to start build run")?;
    print_one(out, &run, |r| format!("Build run created: {}", r.id))?;
    Ok(run)
}

async fn list_runs_cmd(client: &AppStoreConnectClient, out: OutputFormat, workflow_id: &str) -> Result<()> {
    let pb = spinner("Loading runs...");
    let runs = client.list_build_runs_for_workflow(workflow_id).await;
    pb.finish_and_clear();
    let mut runs = runs?;
    runs.sort_by(compare_runs_desc);
    print_list(out, &runs, "No runs found", run_row)
}

fn run_row(run: &CiBuildRun) -> Vec<String> {
    vec![
        resource_id(run).to_string(),
        resource_name(run),
        pretty_run_status(run),
        run.attributes.created_date.clone().unwrap_or_default(),
    ]
}

async fn run_info_cmd(client: &AppStoreConnectClient, out: OutputFormat, run_id: &str) -> Result<()> {
    let pb = spinner("Loading run info...");
    let run = client.get_build_run(run_id).await;
    pb.finish_and_clear();
    print_one(out, &run?, |r| run_row(r).join("\t"))
}

async fn wait_cmd(
    client: &AppStoreConnectClient,
    out: OutputFormat,
    run_id: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let pb = spinner(&format!("Waiting for build run {}...", run_id));
    let run = client.wait_for_build_run(run_id, interval, timeout).await;
    pb.finish_and_clear();
    let run = run.with_context(|| format!("Failed waiting for build run {}", run_id))?;
    print_one(out, &run, |r| run_row(r).join("\t"))?;
    if !is_build_run_successful(run.attributes.completion_status.as_ref()) {
        bail!(
            "build run {} completed with status {}",
            run_id,
            pretty_run_status(&run)
        );
    }
    Ok(())
}

async fn run_actions_cmd(client: &AppStoreConnectClient, out: OutputFormat, run_id: &str) -> Result<()> {
    let pb = spinner("Loading actions...");
    let actions = client.list_actions_for_run(run_id).await;
    pb.finish_and_clear();
    print_list(out, &actions?, "No actions found", |a| {
        let status = a
            .attributes
            .completion_status
            .as_ref()
            .map(|s| s.as_str())
            .or_else(|| a.attributes.execution_progress.as_ref().map(|p| p.as_str()))
            .unwrap_or("UNKNOWN");
        vec![resource_id(a).to_string(), resource_name(a), status.to_string()]
    })
}

async fn run_artifacts_cmd(client: &AppStoreConnectClient, out: OutputFormat, run_id: &str) -> Result<()> {
    let pb = spinner("Loading artifacts...");
    let artifacts = client.list_artifacts_for_run(run_id).await;
    pb.finish_and_clear();
    print_list(out, &artifacts?, "No artifacts found", |a| {
        vec![
            resource_id(a).to_string(),
            resource_name(a),
            a.attributes.file_size.map(|s| s.to_string()).unwrap_or_default(),
        ]
    })
}

/// `name.ext`, then `name(1).ext`, `name(2).ext`, ... until unused.
fn unique_destination(file_name: &str) -> PathBuf {
    let mut dest = PathBuf::from(file_name);
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("bin")
        .to_string();
    let mut counter = 1;
    while dest.exists() {
        dest = PathBuf::from(format!("{}({}).{}", stem, counter, ext));
        counter += 1;
    }
    dest
}

async fn artifact_download_cmd(client: &AppStoreConnectClient, artifact_id: &str, dest: Option<PathBuf>) -> Result<()> {
    let dest = match dest {
        Some(dest) => dest,
        None => {
            let artifact = client.get_artifact(artifact_id).await?;
            let file_name = artifact
                .attributes
                .file_name
                .clone()
                .unwrap_or_else(|| format!("{}.bin", artifact.id));
            // Keep only the final component of a server-supplied name.
            let file_name = Path::new(&file_name)
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("artifact.bin")
                .to_string();
            unique_destination(&file_name)
        }
    };
    let pb = spinner(&format!("Downloading to {}...", dest.display()));
    let written = client.download_artifact(artifact_id, &dest).await;
    pb.finish_and_clear();
    let written = written.context("Download failed")?;
    println!("Saved {} bytes to {}", written, dest.display());
    Ok(())
}

async fn run_test_results_cmd(client: &AppStoreConnectClient, out: OutputFormat, run_id: &str) -> Result<()> {
    let pb = spinner("Loading test results...");
    let results = client.list_test_results_for_run(run_id).await;
    pb.finish_and_clear();
    print_list(out, &results?, "No test results found", |t| {
        vec![
            resource_id(t).to_string(),
            resource_name(t),
            t.attributes.status.clone().unwrap_or_default(),
        ]
    })
}

async fn list_apps_cmd(client: &AppStoreConnectClient, out: OutputFormat, bundle_id: Option<&str>) -> Result<()> {
    let pb = spinner("Loading apps...");
    let apps = client.list_apps(bundle_id).await;
    pb.finish_and_clear();
    print_list(out, &apps?, "No apps found", |a| {
        vec![
            resource_id(a).to_string(),
            resource_name(a),
            a.attributes.bundle_id.clone().unwrap_or_default(),
        ]
    })
}

async fn list_builds_cmd(
    client: &AppStoreConnectClient,
    out: OutputFormat,
    app_id: &str,
    limit: Option<u32>,
) -> Result<()> {
    let pb = spinner("Loading builds...");
    let builds = client.list_builds_for_app(app_id, limit).await;
    pb.finish_and_clear();
    print_list(out, &builds?, "No builds found", |b| {
        vec![
            resource_id(b).to_string(),
            resource_name(b),
            b.attributes.processing_state.clone().unwrap_or_default(),
            b.attributes.uploaded_date.clone().unwrap_or_default(),
        ]
    })
}

async fn linkages_cmd(
    client: &AppStoreConnectClient,
    out: OutputFormat,
    resource: &str,
    id: &str,
    relationship: &str,
    paginate: bool,
    limit: Option<u32>,
) -> Result<()> {
    let linkages = if paginate {
        client.get_all_linkages(resource, id, relationship).await?
    } else {
        let query = LinkagesQuery {
            limit,
            next_url: None,
        };
        client.get_linkages(resource, id, relationship, &query).await?
    };
    print_list(out, &linkages.data, "No linkages found", |l| {
        vec![l.kind.clone(), l.id.clone()]
    })?;
    if let Some(next) = linkages.links.next.as_deref().filter(|_| out == OutputFormat::Text) {
        eprintln!("More results: {}", next);
    }
    Ok(())
}

async fn print_token_cmd(client: &AppStoreConnectClient) -> Result<()> {
    let token = client.bearer().await?;
    println!("{}", token);
    Ok(())
}

enum Pick {
    Item(usize),
    Back,
    Exit,
}

/// Menu with optional Back entry and a trailing Exit entry.
fn pick(theme: &ColorfulTheme, prompt: &str, mut items: Vec<String>, with_back: bool) -> Result<Pick> {
    let len = items.len();
    if with_back {
        items.push("Back".into());
    }
    items.push("Exit".into());
    let idx = Select::with_theme(theme)
        .with_prompt(prompt)
        .default(0)
        .items(&items)
        .interact()?;
    Ok(match idx {
        i if i < len => Pick::Item(i),
        i if with_back && i == len => Pick::Back,
        _ => Pick::Exit,
    })
}

async fn browse_flow(client: &AppStoreConnectClient) -> Result<()> {
    let theme = ColorfulTheme::default();

    let products = {
        let pb = spinner("Loading products...");
        let p = client.list_ci_products().await;
        pb.finish_and_clear();
        p?
    };
    if products.is_empty() {
        println!("No products available");
        return Ok(());
    }

    loop {
        let product = match pick(&theme, "Select a product", products.iter().map(resource_name).collect(), false)? {
            Pick::Item(i) => &products[i],
            Pick::Back | Pick::Exit => return Ok(()),
        };

        let workflows = {
            let pb = spinner("Loading workflows...");
            let w = client.list_workflows_for_product(&product.id).await;
            pb.finish_and_clear();
            w?
        };
        if workflows.is_empty() {
            println!("No workflows for this product");
            continue;
        }

        'workflows: loop {
            let workflow = match pick(&theme, "Select a workflow", workflows.iter().map(resource_name).collect(), true)? {
                Pick::Item(i) => &workflows[i],
                Pick::Back => break 'workflows,
                Pick::Exit => return Ok(()),
            };

            let repo_id = {
                let pb = spinner("Resolving repository...");
                let via_workflow = client.resolve_repository_id_for_workflow(&workflow.id).await;
                let r = match via_workflow {
                    Ok(Some(id)) => Ok(Some(id)),
                    Ok(None) => client.resolve_repository_id_for_product(&product.id).await,
                    Err(e) => Err(e),
                };
                pb.finish_and_clear();
                r?
            };
            let Some(repo_id) = repo_id else {
                println!("No repositories attached to this product");
                continue;
            };
            let branches = {
                let pb = spinner("Loading branches...");
                let b = client.list_branches_for_repository(&repo_id).await;
                pb.finish_and_clear();
                b?
            };
            if branches.is_empty() {
                println!("No branches found");
                continue;
            }

            loop {
                let branch = match pick(&theme, "Select a branch", branches.iter().map(resource_name).collect(), true)? {
                    Pick::Item(i) => &branches[i],
                    Pick::Back => continue 'workflows,
                    Pick::Exit => return Ok(()),
                };

                let actions = vec!["Start build run".to_string(), "Show recent runs".to_string()];
                match pick(&theme, "Choose action", actions, true)? {
                    Pick::Item(0) => {
                        let pb = spinner("Starting build run...");
                        let res = client.start_build_run(&workflow.id, &branch.id).await;
                        pb.finish_and_clear();
                        match res {
                            Ok(run) => println!("Build run created: {}", run.id),
                            Err(e) => eprintln!("Failed to start build: {}", e),
                        }
                    }
                    Pick::Item(_) => {
                        if !runs_submenu(client, &theme, &workflow.id).await? {
                            return Ok(());
                        }
                    }
                    Pick::Back => continue,
                    Pick::Exit => return Ok(()),
                }
            }
        }
    }
}

/// Returns false when the user chose Exit.
async fn runs_submenu(client: &AppStoreConnectClient, theme: &ColorfulTheme, workflow_id: &str) -> Result<bool> {
    loop {
        let mut runs = {
            let pb = spinner("Loading runs...");
            let r = client.list_build_runs_for_workflow(workflow_id).await;
            pb.finish_and_clear();
            r?
        };
        if runs.is_empty() {
            println!("No runs found");
            return Ok(true);
        }
        runs.sort_by(compare_runs_desc);

        let items = runs.iter().map(|r| run_row(r).join(" - ")).collect();
        let run = match pick(theme, "Select a run", items, true)? {
            Pick::Item(i) => &runs[i],
            Pick::Back => return Ok(true),
            Pick::Exit => return Ok(false),
        };

        let actions = vec![
            "View details".to_string(),
            "List artifacts".to_string(),
            "Test results".to_string(),
        ];
        match pick(theme, "Run actions", actions, true)? {
            Pick::Item(0) => run_info_cmd(client, OutputFormat::Json, &run.id).await?,
            Pick::Item(1) => run_artifacts_cmd(client, OutputFormat::Text, &run.id).await?,
            Pick::Item(_) => run_test_results_cmd(client, OutputFormat::Text, &run.id).await?,
            Pick::Back => continue,
            Pick::Exit => return Ok(false),
        }
    }
}
