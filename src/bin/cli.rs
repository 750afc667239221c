use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use document_index::cloud_client::{
    local_file_name, CloudClient, UploadProgress, DEFAULT_SERVER_URL,
};
use document_index::controller::{
    Controller, DocumentForm, ImportOutcome, Interaction, NotificationLevel, View,
};
use document_index::document_store::{DocumentStore, FileStorage, DEFAULT_DOCUMENTS_FILE};
use document_index::models::Section;
use document_index::render;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "docindex")]
#[command(about = "A CLI tool for filing documents by section and managing cloud attachments", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_DOCUMENTS_FILE, help = "Document collection file")]
    data: PathBuf,

    #[arg(long, global = true, env = "DOCINDEX_SERVER", default_value = DEFAULT_SERVER_URL, help = "File server base URL")]
    server: String,

    #[arg(short, long, global = true, help = "Answer yes to every confirmation")]
    yes: bool,

    #[arg(long, global = true, help = "Refuse to add new documents during this run")]
    disable_adding: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show the available sections")]
    Sections,

    #[command(about = "List documents in a section")]
    List {
        #[arg(short, long, default_value_t = Section::Shop21, help = "Section to show")]
        section: Section,
    },

    #[command(about = "Add a new document")]
    Add(DocumentArgs),

    #[command(about = "Edit an existing document")]
    Edit {
        #[arg(help = "Document ID")]
        id: String,

        #[command(flatten)]
        fields: DocumentArgs,
    },

    #[command(about = "Delete a document")]
    Delete {
        #[arg(help = "Document ID")]
        id: String,
    },

    #[command(about = "Export all documents to a dated JSON file")]
    Export {
        #[arg(short, long, default_value = ".", help = "Directory to write the export into")]
        dir: PathBuf,
    },

    #[command(about = "Replace all documents with the contents of a JSON export")]
    Import {
        #[arg(help = "Path to the JSON file")]
        file: PathBuf,
    },

    #[command(about = "Delete every document")]
    Clear,

    #[command(about = "Print an index of every section's documents")]
    Print {
        #[arg(short, long, help = "Write the index to a file instead of stdout")]
        out: Option<PathBuf>,
    },

    #[command(subcommand, about = "Work with files stored on the server")]
    Cloud(CloudCommands),
}

#[derive(Args)]
struct DocumentArgs {
    #[arg(short, long, help = "Section (defaults to shop-21 for new documents)")]
    section: Option<Section>,

    #[arg(short, long, help = "Category label")]
    category: Option<String>,

    #[arg(short, long, help = "Document title")]
    title: Option<String>,

    #[arg(short, long, help = "Date (YYYY-MM-DD)")]
    date: Option<String>,

    #[arg(short, long, help = "Amount due (an empty value clears it)")]
    amount: Option<String>,

    #[arg(short, long, help = "Notes (an empty value clears them)")]
    notes: Option<String>,

    #[arg(short, long, help = "External link to the file (an empty value clears it)")]
    link: Option<String>,

    #[arg(short, long, help = "Local file to upload and attach")]
    file: Option<PathBuf>,
}

impl DocumentArgs {
    fn apply_to(self, form: &mut DocumentForm) -> Result<()> {
        if let Some(section) = self.section {
            form.section = section;
        }
        if let Some(category) = self.category {
            form.category = category;
        }
        if let Some(title) = self.title {
            form.title = title;
        }
        if let Some(date) = self.date {
            form.date = date;
        }
        if let Some(amount) = self.amount {
            form.amount = parse_amount(&amount)?;
        }
        if let Some(notes) = self.notes {
            form.notes = blank_to_none(notes);
        }
        if let Some(link) = self.link {
            form.external_link = blank_to_none(link);
        }
        form.attachment = self.file;
        Ok(())
    }
}

/// `""` clears the amount; anything else must be a number.
fn parse_amount(text: &str) -> Result<Option<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let amount = text
        .parse::<f64>()
        .with_context(|| format!("Invalid amount '{}'", text))?;
    if !amount.is_finite() {
        bail!("Invalid amount '{}'", text);
    }
    Ok(Some(amount))
}

fn blank_to_none(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

#[derive(Subcommand)]
enum CloudCommands {
    #[command(about = "List uploaded files")]
    List,

    #[command(about = "Upload a file")]
    Upload {
        #[arg(help = "Path to the file")]
        file: PathBuf,
    },

    #[command(about = "Download a file by key")]
    Download {
        #[arg(help = "File key")]
        key: String,

        #[arg(short, long, help = "Output path (defaults to the original file name)")]
        out: Option<PathBuf>,
    },
}

struct Terminal {
    assume_yes: bool,
}

impl Interaction for Terminal {
    fn confirm(&mut self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        print!("⚠️  {} [y/N] ", message);
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }

    fn notify(&mut self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Info => println!("ℹ️  {}", message),
            NotificationLevel::Success => println!("✅ {}", message),
            NotificationLevel::Warning => eprintln!("⚠️  {}", message),
            NotificationLevel::Error => eprintln!("❌ {}", message),
        }
    }
}

type App = Controller<FileStorage, CloudClient, Terminal>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = DocumentStore::open(FileStorage::new(&cli.data))?;
    let server = cli.server.clone();
    let mut app = Controller::new(
        store,
        CloudClient::new(server.clone()),
        Terminal { assume_yes: cli.yes },
    );
    if cli.disable_adding {
        app.toggle_adding();
    }

    match cli.command {
        Commands::Sections => {
            println!("{}", render::render_sections(app.state().current_section));
        }
        Commands::List { section } => {
            show(&mut app, section).await;
        }
        Commands::Add(fields) => {
            let mut form = app.open_add_form()?;
            fields.apply_to(&mut form)?;
            save(&mut app, form).await?;
        }
        Commands::Edit { id, fields } => {
            let Some(mut form) = app.open_edit_form(&id) else {
                bail!("Document {} not found", id);
            };
            fields.apply_to(&mut form)?;
            save(&mut app, form).await?;
        }
        Commands::Delete { id } => {
            if app.delete_document(&id)? {
                println!("🗑️  Document {} deleted", id);
            }
        }
        Commands::Export { dir } => {
            let path = app.export_to(&dir)?;
            println!("📦 Exported {} documents to {}", app.store().all().len(), path.display());
        }
        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            if app.import_json(&text)? == ImportOutcome::Cancelled {
                println!("Import cancelled");
            }
        }
        Commands::Clear => {
            if !app.clear_all()? {
                println!("Nothing was deleted");
            }
        }
        Commands::Print { out } => {
            let index = render::render_index(app.store().all(), Local::now().date_naive());
            match out {
                Some(path) => {
                    std::fs::write(&path, &index)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("🖨️  Index written to {}", path.display());
                }
                None => print!("{}", index),
            }
        }
        Commands::Cloud(CloudCommands::List) => {
            show(&mut app, Section::CloudFiles).await;
        }
        Commands::Cloud(CloudCommands::Upload { file }) => {
            let (tx, printer) = progress_printer();
            let uploaded = app.upload_to_cloud(&file, Some(tx)).await;
            let _ = printer.await;
            let uploaded = uploaded?;
            println!("   Key: {}", uploaded.file_key);
            println!("   Size: {}", render::format_file_size(uploaded.file_size));
            println!("   URL: {}", CloudClient::new(server).absolute_url(&uploaded.download_url));
        }
        Commands::Cloud(CloudCommands::Download { key, out }) => {
            let file = CloudClient::new(server).download(&key).await?;
            let path = out
                .or_else(|| file.file_name.as_ref().map(PathBuf::from))
                .or_else(|| local_file_name(&key).map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("download.bin"));
            std::fs::write(&path, &file.data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "⬇️  Saved {} ({}) to {}",
                key,
                render::format_file_size(file.data.len() as u64),
                path.display()
            );
        }
    }

    Ok(())
}

async fn show(app: &mut App, section: Section) {
    let view = app.switch_section(section).await;
    if view.allows_adding() && !app.state().adding_disabled {
        println!("➕ Add with: docindex add --section {}", section);
    }
    match view {
        View::Documents { section, documents } => {
            print!("{}", render::render_documents(section, &documents));
        }
        View::Cloud { files } => print!("{}", render::render_cloud_files(&files)),
        View::CloudUnavailable { .. } => {}
    }
}

async fn save(app: &mut App, form: DocumentForm) -> Result<()> {
    let (tx, printer) = progress_printer();
    let saved = app.submit_form(&form, Some(tx)).await;
    let _ = printer.await;
    let saved = saved?;
    println!("   ID: {}", saved.id);
    println!("   Section: {}", saved.section.title());
    if let Some(link) = &saved.file_link {
        println!("   File: {}", link);
    }
    Ok(())
}

/// Prints upload progress until the sender side is dropped.
fn progress_printer() -> (mpsc::UnboundedSender<UploadProgress>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<UploadProgress>();
    let handle = tokio::spawn(async move {
        let mut printed = false;
        while let Some(progress) = rx.recv().await {
            print!("\r⬆️  Uploading... {:.0}%", progress.percent());
            let _ = io::stdout().flush();
            printed = true;
        }
        if printed {
            println!();
        }
    });
    (tx, handle)
}
