use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::{LevelFilter, info};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

mod cli;

use cli::Cli;
use cli::commands::{Commands, SubmitArgs};
use sjq::config::Config;
use sjq::domain::{JobRecord, JobRequest, JobState, format_mem};
use sjq::ipc::IpcClient;

fn setup_logging(cli: &Cli) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        // Narrowed to the configured level once the config is loaded
        builder.filter_level(LevelFilter::Trace);
    }

    if cli.logs_to_stderr() {
        builder.target(env_logger::Target::Stderr).init();
    } else {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sjq")
            .join("logs");

        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

        let log_file = log_dir.join("sjq.log");
        let target = Box::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .context("Failed to open log file")?,
        );
        builder.target(env_logger::Target::Pipe(target)).init();
    }

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
    Ok(())
}

fn apply_log_level(config: &Config) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(level) = config.log_level.as_deref() {
        match level.parse::<LevelFilter>() {
            Ok(filter) => log::set_max_level(filter),
            Err(_) => log::warn!("Ignoring unknown log_level {:?}", level),
        }
    }
}

async fn connect(config: &Config) -> Result<IpcClient> {
    IpcClient::connect_to(&config.daemon.socket_path)
        .await
        .context("Is the daemon running? Start it with `sjq daemon`")
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    if cli.is_verbose() {
        println!("{} {}", "Socket:".yellow(), config.daemon.socket_path.display());
    }

    match &cli.command {
        Commands::Daemon { foreground } => handle_daemon_command(*foreground, config).await,
        Commands::Submit(args) => handle_submit_command(args, config).await,
        Commands::Status { jobid } => handle_status_command(*jobid, config).await,
        Commands::List { state } => handle_list_command(*state, config).await,
        Commands::Release { jobid } => handle_release_command(*jobid, config).await,
        Commands::Ledger => handle_ledger_command(config).await,
        Commands::Shutdown => handle_shutdown_command(config).await,
    }
}

async fn handle_daemon_command(foreground: bool, config: &Config) -> Result<()> {
    info!("Starting daemon (foreground: {})", foreground);
    if foreground {
        println!("{} {}", "Daemon listening on".cyan(), config.daemon.socket_path.display());
    }
    sjq::daemon::run(config).await.context("Daemon failed")?;
    Ok(())
}

fn read_script(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(p) if p.as_path() != Path::new("-") => {
            fs::read_to_string(p).with_context(|| format!("Failed to read script {}", p.display()))
        }
        _ => {
            let mut src = String::new();
            std::io::stdin()
                .read_to_string(&mut src)
                .context("Failed to read script from stdin")?;
            Ok(src)
        }
    }
}

fn build_request(args: &SubmitArgs, src: String) -> Result<JobRequest> {
    let cwd = match &args.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    Ok(JobRequest {
        src,
        procs: args.procs,
        mem: args.mem.clone(),
        name: args.name.clone(),
        cwd: Some(cwd),
        stdout: args.stdout.clone(),
        stderr: args.stderr.clone(),
        env: args.env.clone(),
        uid: args.uid,
        gid: args.gid,
        priority: args.priority,
        depends_on: args.after.clone(),
        hold: args.hold,
        hold_until: args
            .hold_for
            .map(|secs| chrono::Utc::now().timestamp() + secs as i64),
    })
}

async fn handle_submit_command(args: &SubmitArgs, config: &Config) -> Result<()> {
    let src = read_script(args.script.as_ref())?;
    let request = build_request(args, src)?;

    let mut client = connect(config).await?;
    match client.submit(&request).await.context("Submission failed")? {
        Some(jobid) => {
            info!("Submitted job {}", jobid);
            println!("{}", jobid);
            Ok(())
        }
        None => bail!("Rejected: the job asks for more than the daemon's configured maximum"),
    }
}

fn state_label(state: JobState) -> ColoredString {
    match state {
        JobState::Queued => state.as_str().normal(),
        JobState::Held => state.as_str().yellow(),
        JobState::Running => state.as_str().cyan(),
        JobState::Succeeded => state.as_str().green(),
        JobState::Failed | JobState::Aborted => state.as_str().red(),
    }
}

fn print_job(job: &JobRecord) {
    println!("{} {}", "Job:".green(), job.jobid);
    println!("  name:      {}", job.name);
    println!("  state:     {}", state_label(job.state));
    if let Some(code) = job.retcode {
        println!("  retcode:   {}", code);
    }
    println!("  procs:     {}", job.procs);
    println!("  mem:       {}", job.mem.map(format_mem).unwrap_or_else(|| "-".to_string()));
    println!("  priority:  {}", job.priority);
    if let Some(cwd) = &job.cwd {
        println!("  cwd:       {}", cwd.display());
    }
    if let Some(until) = job.hold_until {
        println!("  held until {}", until);
    }
}

async fn handle_status_command(jobid: i64, config: &Config) -> Result<()> {
    let mut client = connect(config).await?;
    let job = client.get(jobid).await.context("Status failed")?;
    print_job(&job);
    Ok(())
}

async fn handle_list_command(state: Option<JobState>, config: &Config) -> Result<()> {
    let mut client = connect(config).await?;
    let jobs = client.list(state).await.context("List failed")?;

    if jobs.is_empty() {
        println!("{}", "No jobs".yellow());
        return Ok(());
    }
    println!("{:>6}  {:<10}  {:>5}  {:>8}  {}", "JOBID", "STATE", "PROCS", "MEM", "NAME");
    for job in &jobs {
        println!(
            "{:>6}  {:<10}  {:>5}  {:>8}  {}",
            job.jobid,
            state_label(job.state),
            job.procs,
            job.mem.map(format_mem).unwrap_or_else(|| "-".to_string()),
            job.name
        );
    }
    Ok(())
}

async fn handle_release_command(jobid: i64, config: &Config) -> Result<()> {
    let mut client = connect(config).await?;
    if client.release(jobid).await.context("Release failed")? {
        println!("{} {}", "Released:".green(), jobid);
    } else {
        println!("{} job {} is not held", "Unchanged:".yellow(), jobid);
    }
    Ok(())
}

async fn handle_ledger_command(config: &Config) -> Result<()> {
    let mut client = connect(config).await?;
    let ledger = client.status().await.context("Status failed")?;
    println!("{} {}/{}", "Slots free:".green(), ledger.available_slots, ledger.max_slots);
    println!("{} {}/{}", "Memory free:".green(), ledger.available_mem, ledger.max_mem);
    println!("{} {}", "Running:".green(), ledger.running);
    Ok(())
}

async fn handle_shutdown_command(config: &Config) -> Result<()> {
    let mut client = connect(config).await?;
    client.shutdown().await.context("Shutdown failed")?;
    println!("{}", "Daemon shutting down".cyan());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging first
    setup_logging(&cli).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_log_level(&config);

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await?;

    Ok(())
}
