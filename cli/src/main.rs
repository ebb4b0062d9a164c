use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mailgate::assemble::{EmailFields, MessageAssembler};
use mailgate::attachments::{ByteSource, UploadedPart, MAX_ATTACHMENTS};
use mailgate::config::{MailSettings, ServerSettings};
use mailgate::mail::{Mailer, Sender, SmtpMailer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailgate", about = "Relay web form submissions to an SMTP server")]
struct Cli {
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Overrides PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check that the SMTP credentials are accepted
    Verify,
    /// Send a single message
    Send(SendArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Comma separated recipients
    #[arg(long)]
    to: String,

    #[arg(long)]
    cc: Option<String>,

    #[arg(long)]
    bcc: Option<String>,

    #[arg(long)]
    subject: String,

    /// Plain text body, or the fallback when --html is given
    #[arg(long)]
    text: Option<String>,

    #[arg(long)]
    html: Option<String>,

    #[arg(long = "attach", value_name = "PATH")]
    attachments: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mail = MailSettings::load().context("loading EMAIL_* settings")?;

    match cli.command {
        Commands::Serve { port } => {
            let mut server = ServerSettings::load().context("loading server settings")?;
            if let Some(port) = port {
                server.port = port;
            }
            tracing::info!(storage = ?server.upload_storage, "starting mail relay");

            let ctx = mailgate::Context::from_settings(&mail, &server)?;
            mailgate::serve((Ipv4Addr::UNSPECIFIED, server.port), mailgate::router(ctx))
                .await
                .context("error running HTTP server")?;
        }
        Commands::Verify => {
            SmtpMailer::from_settings(&mail)?
                .verify()
                .await
                .context("SMTP verification failed")?;
            tracing::info!("SMTP configuration is valid");
        }
        Commands::Send(args) => {
            let message_id = send(&mail, args).await?;
            println!("{message_id}");
        }
    }
    Ok(())
}

async fn send(mail: &MailSettings, args: SendArgs) -> Result<String> {
    if args.attachments.len() > MAX_ATTACHMENTS {
        bail!("at most {MAX_ATTACHMENTS} files may be attached");
    }

    let mut attachments = Vec::with_capacity(args.attachments.len());
    for path in &args.attachments {
        attachments.push(read_attachment(path).await?);
    }

    let fields = EmailFields {
        to: Some(args.to),
        cc: args.cc,
        bcc: args.bcc,
        subject: Some(args.subject),
        email_type: Some(if args.html.is_some() { "html" } else { "plain" }.to_string()),
        message: args.text,
        html_message: args.html,
    };

    let mailer = SmtpMailer::from_settings(mail)?;
    let assembler = MessageAssembler::new(Sender::new(&mail.from_name, &mail.user));
    let message = assembler.assemble(fields, attachments)?;

    let receipt = mailgate::api::dispatch(&mailer, message).await?;
    tracing::info!(message_id = %receipt.message_id, "email sent");
    Ok(receipt.message_id)
}

async fn read_attachment(path: &Path) -> Result<UploadedPart> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading attachment {}", path.display()))?;
    let original_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("attachment path has no file name")?
        .to_string();

    Ok(UploadedPart {
        original_name,
        content_type: None,
        data: ByteSource::Memory(data.into()),
    })
}
