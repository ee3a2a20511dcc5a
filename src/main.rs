//! Flowcap CLI - capture page content and turn it into workflows
//!
//! The application logic is contained in lib.rs, and this file is responsible
//! for parsing arguments, wiring the router and handling top-level errors.

use anyhow::{bail, Context};
use clap::{Args, CommandFactory, Parser, Subcommand};
use colored::Colorize;
use dialoguer::{Confirm, Input, Password};
use flowcap::client::RewriteTone;
use flowcap::extractor::load_page;
use flowcap::router::Payload;
use flowcap::ui::{self, ChannelControl};
use flowcap::router::NOT_ENOUGH_CONTENT;
use flowcap::workflow::{
    GeneratedWorkflow, NewComment, NewStep, NewWorkflow, StepStatus, StepUpdate, WorkflowStatus,
    WorkflowUpdate,
};
use flowcap::{Config, Request, Response, Router, Store, TextOptions, WorkflowClient};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowcap")]
#[command(author, version, about = "Capture page content and turn it into workflows", long_about = None)]
struct Cli {
    /// Config file (defaults to ./flowcap.toml, then ~/.config/flowcap/flowcap.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PageArgs {
    /// URL or local HTML file
    source: String,
    /// Text to treat as the current selection
    #[arg(long)]
    selection: Option<String>,
    #[arg(long)]
    no_email: bool,
    #[arg(long)]
    no_forms: bool,
    #[arg(long)]
    no_tables: bool,
    #[arg(long)]
    no_document: bool,
}

impl PageArgs {
    fn options(&self, include_selection: bool) -> TextOptions {
        TextOptions {
            include_selection,
            include_email: !self.no_email,
            include_document: !self.no_document,
            include_forms: !self.no_forms,
            include_tables: !self.no_tables,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    #[command(flatten)]
    App(AppCommand),
}

#[derive(Subcommand)]
enum AppCommand {
    /// Extract a page and print the normalized text
    Extract {
        #[command(flatten)]
        page: PageArgs,
        /// Print the full extraction as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Extract a whole page and generate a workflow from it
    Generate {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Generate again from the last submitted content
    Regenerate {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Select text interactively and generate a workflow from it
    Select {
        /// URL or local HTML file
        source: String,
    },
    /// Show the pending workflow
    Preview,
    /// Edit the pending workflow in $EDITOR
    Edit,
    /// Save the pending workflow to the backend
    Save,
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Clear the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Manage saved workflows
    Workflows {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Manage the steps of a saved workflow
    Steps {
        #[command(subcommand)]
        command: StepCommands,
    },
    /// Manage comments on workflows and steps
    Comments {
        #[command(subcommand)]
        command: CommentCommands,
    },
    /// Show recent activity
    Activity {
        /// Only activity for this workflow
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Rewrite a step description in another tone
    Rewrite {
        text: String,
        #[arg(long, value_enum, default_value_t = RewriteTone::ClearEnterprise)]
        tone: RewriteTone,
    },
    /// Send a raw router message, e.g. '{"action":"ping"}'
    Send {
        message: String,
        /// Register this URL or HTML file as the page
        #[arg(long)]
        page: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// List workflows
    List {
        #[arg(long)]
        org: Option<String>,
    },
    /// Show a workflow with its steps
    Show { id: String },
    /// Create an empty workflow
    Create {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        org: Option<String>,
    },
    /// Change a workflow's title or description
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Archive a workflow
    Archive { id: String },
    /// Restore an archived workflow
    Restore { id: String },
    /// Comment on a workflow
    Comment { id: String, text: String },
    /// Delete a workflow
    Delete {
        id: String,
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum StepCommands {
    /// List the steps of a workflow
    List { workflow: String },
    /// Append a step to a workflow
    Add {
        workflow: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// User id to assign the step to
        #[arg(long)]
        assign: Option<String>,
    },
    /// Change a step's title, description or assignee
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        assign: Option<String>,
    },
    /// Mark a step pending, in progress or completed
    Status {
        id: String,
        #[arg(value_enum)]
        status: StepStatus,
    },
    /// Delete a step
    Delete {
        id: String,
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CommentCommands {
    /// List comments on a workflow or step
    List {
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long)]
        step: Option<String>,
    },
    /// Comment on a step
    Add { step: String, text: String },
    /// Delete a comment
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "flowcap", &mut std::io::stdout());
            return Ok(());
        }
        Commands::App(command) => command,
    };

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    std::fs::create_dir_all(&config.storage.path).with_context(|| {
        format!("cannot create storage directory {}", config.storage.path.display())
    })?;

    // The selection UI owns the terminal, so its logs go to a file
    let log_file = matches!(command, AppCommand::Select { .. })
        .then(|| config.storage.path.join("flowcap.log"));
    init_tracing(log_file.as_deref())?;

    let store = Store::open(&config.storage.path)?;
    let client = WorkflowClient::new(&config, store.clone())?;

    match command {
        AppCommand::Extract { page, json } => {
            let mut loaded = load_page(&page.source).await?;
            if let Some(selection) = &page.selection {
                loaded.set_selection(selection.as_str());
            }
            let router = Router::new(client).with_page(loaded);
            let response = router
                .dispatch(Request::ExtractContent {
                    options: page.options(true),
                })
                .await;

            match response {
                Response {
                    success: true,
                    payload:
                        Payload::Content {
                            extracted,
                            text_content,
                            ..
                        },
                    ..
                } => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&extracted)?);
                    } else {
                        println!("{}", text_content);
                    }
                }
                response => bail!(failure(response, "Failed to extract content")),
            }
        }
        AppCommand::Generate { page } => {
            println!("🔄 Extracting page content...");
            let mut loaded = load_page(&page.source).await?;
            if let Some(selection) = &page.selection {
                loaded.set_selection(selection.as_str());
            }
            let router = Router::new(client).with_page(loaded);
            let response = router.generate_from_page(&page.options(false)).await;
            if response.error.as_deref() == Some(NOT_ENOUGH_CONTENT) {
                println!("{}", "⚠️  Not enough content found on this page".yellow());
                return Ok(());
            }
            show_generated(response)?;
        }
        AppCommand::Regenerate { yes } => {
            let content = store
                .pending_content()?
                .context("Nothing to regenerate. Run `flowcap generate` or `flowcap select` first.")?;
            if !yes
                && !Confirm::new()
                    .with_prompt(
                        "Are you sure you want to regenerate? This will replace the current workflow.",
                    )
                    .default(false)
                    .interact()?
            {
                return Ok(());
            }
            generate(&Router::new(client), content).await?;
        }
        AppCommand::Select { source } => {
            if !atty::is(atty::Stream::Stdout) {
                bail!("selection mode needs an interactive terminal");
            }

            let page = load_page(&source).await?;
            let metadata = page.metadata();
            let title = if metadata.title.is_empty() {
                metadata.url
            } else {
                metadata.title
            };
            let lines = page.text_lines();

            let (control, commands) = ChannelControl::new();
            let router = Arc::new(
                Router::new(client)
                    .with_page(page)
                    .with_selection_control(control),
            );
            let response = router.dispatch(Request::EnableSelectionMode).await;
            if !response.success {
                bail!(failure(response, "Failed to enable selection mode"));
            }

            match ui::run(router, title, lines, commands).await? {
                Some(workflow) => {
                    println!("{}", "✨ Workflow generated!".green());
                    print_workflow(&workflow);
                    print_next_steps();
                }
                None => println!("Selection mode closed."),
            }
        }
        AppCommand::Preview => match store.pending_workflow()? {
            Some(workflow) => {
                print_workflow(&workflow);
                print_next_steps();
            }
            None => println!("No workflow found. Please generate a workflow first."),
        },
        AppCommand::Edit => {
            let workflow = store
                .pending_workflow()?
                .context("No workflow found. Please generate a workflow first.")?;
            let edited = edit::edit(serde_json::to_string_pretty(&workflow)?)?;
            let edited: GeneratedWorkflow =
                serde_json::from_str(&edited).context("edited workflow is not valid JSON")?;
            if edited.title.trim().is_empty() {
                bail!("a workflow needs a title");
            }
            store.set_pending_workflow(&edited)?;
            println!("{}", "✅ Workflow updated".green());
        }
        AppCommand::Save => {
            let workflow = store
                .pending_workflow()?
                .context("No workflow found. Please generate a workflow first.")?;
            println!("💾 Saving \"{}\"...", workflow.title);

            let response = Router::new(client)
                .dispatch(Request::SaveWorkflow { workflow })
                .await;
            match response {
                Response {
                    success: true,
                    payload:
                        Payload::Saved {
                            workflow_id,
                            steps_created,
                        },
                    ..
                } => {
                    println!(
                        "{} Workflow {} with {} steps",
                        "✅ Saved!".green(),
                        workflow_id,
                        steps_created
                    );
                    println!("   View it at {}", config.workflows_url().cyan());
                }
                response => bail!(failure(response, "Failed to save workflow")),
            }
        }
        AppCommand::Login { email } => {
            config.supabase().context(
                "Supabase is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY or add an [auth] section to flowcap.toml",
            )?;
            let email = match email {
                Some(email) => email,
                None => Input::new().with_prompt("Email").interact_text()?,
            };
            let password = Password::new().with_prompt("Password").interact()?;

            let user = client.login(&email, &password).await?;
            println!(
                "{} {}",
                "✅ Logged in as".green(),
                user.email.as_deref().unwrap_or(&email)
            );
        }
        AppCommand::Logout => {
            store.logout()?;
            println!("👋 Logged out");
        }
        AppCommand::Whoami => {
            if !store.is_authenticated()? {
                println!("Not logged in. Run `flowcap login`.");
                return Ok(());
            }
            let response = Router::new(client).dispatch(Request::VerifyAuth).await;
            match response {
                Response {
                    success: true,
                    payload: Payload::User { user },
                    ..
                } => {
                    println!("👤 {}", user.email.as_deref().unwrap_or(&user.id));
                    if let Some(name) = &user.name {
                        println!("   {}", name);
                    }
                }
                response => bail!(failure(response, "Could not verify session")),
            }
        }
        AppCommand::Workflows { command } => workflows(&client, command).await?,
        AppCommand::Steps { command } => steps(&client, command).await?,
        AppCommand::Comments { command } => comments(&client, command).await?,
        AppCommand::Activity { workflow } => {
            let activity = client.list_activity(workflow.as_deref()).await?;
            if activity.is_empty() {
                println!("No activity yet.");
            }
            for entry in activity {
                let when = entry
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{} {} {:?} {}",
                    when.dimmed(),
                    entry.action.bold(),
                    entry.entity_type,
                    entry.entity_id
                );
                if let Some(details) = entry.details {
                    println!("   {}", details);
                }
            }
        }
        AppCommand::Rewrite { text, tone } => {
            println!("{}", client.rewrite_step(&text, tone).await?);
        }
        AppCommand::Send { message, page } => {
            let message: serde_json::Value =
                serde_json::from_str(&message).context("message must be a JSON object")?;
            let mut router = Router::new(client);
            if let Some(source) = page {
                router = router.with_page(load_page(&source).await?);
            }
            let reply = router.dispatch_value(message).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }

    Ok(())
}

async fn workflows(client: &WorkflowClient, command: WorkflowCommands) -> anyhow::Result<()> {
    match command {
        WorkflowCommands::List { org } => {
            let workflows = client.list_workflows(org.as_deref()).await?;
            if workflows.is_empty() {
                println!("No workflows found.");
                return Ok(());
            }
            println!("Workflows ({}):\n", workflows.len());
            for workflow in workflows {
                println!(
                    "📋 {} [{:?}]",
                    workflow.title.bold(),
                    workflow.status
                );
                println!("   {}", workflow.id.dimmed());
            }
        }
        WorkflowCommands::Show { id } => {
            let workflow = client.get_workflow(&id).await?;
            let mut steps = match workflow.steps.clone() {
                Some(steps) => steps,
                None => client.list_steps(&id).await?,
            };
            steps.sort_by_key(|s| s.step_order);

            println!("=== {} ===", workflow.title);
            if let Some(description) = &workflow.description {
                println!("{}", description);
            }
            println!("Status: {:?}\n", workflow.status);
            for (i, step) in steps.iter().enumerate() {
                println!("{}. {} [{:?}]", i + 1, step.title.bold(), step.status);
                if let Some(description) = &step.description {
                    println!("   {}", description);
                }
            }
        }
        WorkflowCommands::Create {
            title,
            description,
            org,
        } => {
            let workflow = client
                .create_workflow(&NewWorkflow {
                    title,
                    description,
                    organization_id: org,
                })
                .await?;
            println!("{} {} ({})", "✅ Created".green(), workflow.title, workflow.id);
        }
        WorkflowCommands::Update {
            id,
            title,
            description,
        } => {
            if title.is_none() && description.is_none() {
                bail!("nothing to update, pass --title or --description");
            }
            let update = WorkflowUpdate {
                title,
                description,
                status: None,
            };
            let workflow = client.update_workflow(&id, &update).await?;
            println!("{} {}", "✅ Updated".green(), workflow.title);
        }
        WorkflowCommands::Archive { id } => {
            client.set_workflow_status(&id, WorkflowStatus::Archived).await?;
            println!("📦 Archived {}", id);
        }
        WorkflowCommands::Restore { id } => {
            client.set_workflow_status(&id, WorkflowStatus::Active).await?;
            println!("♻️  Restored {}", id);
        }
        WorkflowCommands::Comment { id, text } => {
            client
                .create_comment(&NewComment {
                    content: text,
                    workflow_id: Some(id),
                    step_id: None,
                })
                .await?;
            println!("💬 Comment added");
        }
        WorkflowCommands::Delete { id, yes } => {
            if !yes
                && !Confirm::new()
                    .with_prompt(format!("Delete workflow {}?", id))
                    .default(false)
                    .interact()?
            {
                return Ok(());
            }
            client.delete_workflow(&id).await?;
            println!("🗑️  Deleted {}", id);
        }
    }
    Ok(())
}

async fn steps(client: &WorkflowClient, command: StepCommands) -> anyhow::Result<()> {
    match command {
        StepCommands::List { workflow } => {
            let mut steps = client.list_steps(&workflow).await?;
            if steps.is_empty() {
                println!("No steps yet.");
                return Ok(());
            }
            steps.sort_by_key(|s| s.step_order);
            for step in steps {
                println!("{}. {} [{:?}]", step.step_order, step.title.bold(), step.status);
                println!("   {}", step.id.dimmed());
            }
        }
        StepCommands::Add {
            workflow,
            title,
            description,
            assign,
        } => {
            let step = client
                .create_step(&NewStep {
                    workflow_id: workflow,
                    title,
                    description,
                    assigned_to: assign,
                })
                .await?;
            println!("{} {} ({})", "✅ Added".green(), step.title, step.id);
        }
        StepCommands::Update {
            id,
            title,
            description,
            assign,
        } => {
            let update = StepUpdate {
                title,
                description,
                assigned_to: assign,
            };
            if update.title.is_none() && update.description.is_none() && update.assigned_to.is_none()
            {
                bail!("nothing to update, pass --title, --description or --assign");
            }
            let step = client.update_step(&id, &update).await?;
            println!("{} {}", "✅ Updated".green(), step.title);
        }
        StepCommands::Status { id, status } => {
            let step = client.set_step_status(&id, status).await?;
            println!("{} {} is now {:?}", "✅".green(), step.title, step.status);
        }
        StepCommands::Delete { id, yes } => {
            if !yes
                && !Confirm::new()
                    .with_prompt(format!("Delete step {}?", id))
                    .default(false)
                    .interact()?
            {
                return Ok(());
            }
            client.delete_step(&id).await?;
            println!("🗑️  Deleted {}", id);
        }
    }
    Ok(())
}

async fn comments(client: &WorkflowClient, command: CommentCommands) -> anyhow::Result<()> {
    match command {
        CommentCommands::List { workflow, step } => {
            if workflow.is_none() && step.is_none() {
                bail!("pass --workflow or --step");
            }
            let comments = client
                .list_comments(workflow.as_deref(), step.as_deref())
                .await?;
            if comments.is_empty() {
                println!("No comments yet.");
            }
            for comment in comments {
                let when = comment
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("💬 {} {}", when.dimmed(), comment.content);
                println!("   {}", comment.id.dimmed());
            }
        }
        CommentCommands::Add { step, text } => {
            client
                .create_comment(&NewComment {
                    content: text,
                    workflow_id: None,
                    step_id: Some(step),
                })
                .await?;
            println!("💬 Comment added");
        }
        CommentCommands::Delete { id } => {
            client.delete_comment(&id).await?;
            println!("🗑️  Deleted comment {}", id);
        }
    }
    Ok(())
}

/// Send `content` for conversion and show the result
async fn generate(router: &Router, content: String) -> anyhow::Result<()> {
    println!("🤖 Generating workflow with AI...");
    show_generated(router.dispatch(Request::GenerateWorkflow { content }).await)
}

fn show_generated(response: Response) -> anyhow::Result<()> {
    match response {
        Response {
            success: true,
            payload: Payload::Workflow { workflow },
            ..
        } => {
            println!("{}", "✨ Workflow generated!".green());
            print_workflow(&workflow);
            print_next_steps();
            Ok(())
        }
        response => bail!(failure(response, "AI generation failed")),
    }
}

fn failure(response: Response, fallback: &str) -> String {
    response.error.unwrap_or_else(|| fallback.to_string())
}

fn print_workflow(workflow: &GeneratedWorkflow) {
    println!("\n=== {} ===", workflow.title);
    if workflow.description.is_empty() {
        println!("{}", "No description provided".dimmed());
    } else {
        println!("{}", workflow.description);
    }

    println!("\n📌 Steps ({}):", workflow.steps.len());
    for (i, step) in workflow.steps.iter().enumerate() {
        match &step.role {
            Some(role) => println!("  {}. {} ({})", i + 1, step.title.bold(), role),
            None => println!("  {}. {}", i + 1, step.title.bold()),
        }
        if !step.description.is_empty() {
            println!("     {}", step.description);
        }
    }
}

fn print_next_steps() {
    println!(
        "\n{}",
        "Next: `flowcap save` to keep it, `flowcap edit` to change it, `flowcap regenerate` to try again"
            .dimmed()
    );
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
