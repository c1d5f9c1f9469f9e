use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use mailprune::config::{
    Settings, DEFAULT_CREDENTIALS_PATH, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS,
    DEFAULT_TOKEN_CACHE_PATH, DEFAULT_USER_ID, MAX_BULK_ITEMS,
};
use mailprune::connectors::retry::RetryPolicy;

#[derive(Debug, Parser)]
#[command(
    name = "mailprune",
    version,
    about = "Search, bulk-delete, mark read and archive Gmail messages"
)]
struct Cli {
    /// Gmail search query, e.g. "from:news@example.com older_than:1y"
    #[arg(long)]
    search: Option<String>,

    /// Delete the messages matched by --search after confirmation
    #[arg(long, default_value_t = false)]
    delete: bool,

    /// Mark every unread message as read
    #[arg(long, default_value_t = false)]
    mark_read: bool,

    /// Move all inbox mail under a new archive_<timestamp> label
    #[arg(long, default_value_t = false)]
    archive_all_mail: bool,

    /// Stop searching after this many matches
    #[arg(long)]
    limit: Option<usize>,

    /// Answer yes to every confirmation prompt
    #[arg(long, default_value_t = false)]
    yes: bool,

    /// Output structured JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// OAuth client secrets file
    #[arg(long, env = "MAILPRUNE_CREDENTIALS", default_value = DEFAULT_CREDENTIALS_PATH)]
    credentials: PathBuf,

    /// Cached OAuth credentials, written after consent and every refresh
    #[arg(long, env = "MAILPRUNE_TOKEN_CACHE", default_value = DEFAULT_TOKEN_CACHE_PATH)]
    token_cache: PathBuf,

    #[arg(long, env = "MAILPRUNE_USER_ID", default_value = DEFAULT_USER_ID)]
    user_id: String,

    /// Ids per batchDelete/batchModify call (at most 1000)
    #[arg(long, default_value_t = MAX_BULK_ITEMS)]
    batch_size: usize,

    /// Results per messages.list page (at most 500)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Abort a listing after this many pages
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: usize,

    /// Retries for throttled or failed requests
    #[arg(long, default_value_t = 0)]
    max_retries: u32,

    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            credentials_path: self.credentials.clone(),
            token_cache_path: self.token_cache.clone(),
            user_id: self.user_id.clone(),
            batch_size: self.batch_size,
            page_size: self.page_size,
            max_pages: self.max_pages,
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy::with_max_retries(self.max_retries),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::io::{self, BufRead, Write};
    use std::time::Instant;

    use anyhow::{Context, Result};
    use chrono::Local;
    use tracing::warn;

    use mailprune::auth::{Authenticator, FileCredentialStore};
    use mailprune::bulk::{self, BulkFailure, BulkOptions, BulkReport};
    use mailprune::config::Settings;
    use mailprune::connectors::{GmailApiClient, MailboxApi};
    use mailprune::error::MailError;
    use mailprune::output::{self, OutputFormat};
    use mailprune::prompt::{self, DELETE_PROMPT, PRINT_PROMPT};
    use mailprune::search::{self, SearchOptions};

    use super::Cli;

    /// The one operation an invocation performs. Archive wins over mark-read,
    /// which wins over search.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Action {
        Archive,
        MarkRead,
        Search {
            query: String,
            delete: bool,
            limit: Option<usize>,
        },
        Nothing,
    }

    impl Action {
        pub fn from_cli(cli: &Cli) -> Self {
            if cli.archive_all_mail {
                Self::Archive
            } else if cli.mark_read {
                Self::MarkRead
            } else if let Some(query) = &cli.search {
                Self::Search {
                    query: query.clone(),
                    delete: cli.delete,
                    limit: cli.limit,
                }
            } else {
                Self::Nothing
            }
        }
    }

    /// Answers come from `input`, results go to `output`, timings, progress
    /// and prompts go to `status`.
    pub struct Console<R, W, S> {
        input: R,
        output: W,
        status: S,
        format: OutputFormat,
        assume_yes: bool,
    }

    impl<R, W, S> Console<R, W, S>
    where
        R: BufRead,
        W: Write,
        S: Write,
    {
        pub fn new(
            input: R,
            output: W,
            status: S,
            format: OutputFormat,
            assume_yes: bool,
        ) -> Self {
            Self {
                input,
                output,
                status,
                format,
                assume_yes,
            }
        }

        fn confirm(&mut self, question: &str, accepted: &str) -> Result<bool> {
            prompt::confirm_or_assume(
                &mut self.input,
                &mut self.status,
                question,
                accepted,
                self.assume_yes,
            )
            .context("read answer")
        }

        fn finish(&mut self, outcome: Result<BulkReport, BulkFailure>) -> Result<()> {
            match outcome {
                Ok(report) => {
                    writeln!(self.output, "{}", output::format_report(self.format, &report)?)?;
                    Ok(())
                }
                Err(failure) if failure.source.is_service_error() => {
                    writeln!(self.status, "An error occurred: {}", failure.source)?;
                    writeln!(
                        self.output,
                        "{}",
                        output::format_report(self.format, &failure.completed)?
                    )?;
                    Ok(())
                }
                Err(failure) => Err(failure.into()),
            }
        }

        fn service_error(&mut self, error: MailError) -> Result<()> {
            if error.is_service_error() {
                writeln!(self.status, "An error occurred: {error}")?;
                Ok(())
            } else {
                Err(error.into())
            }
        }
    }

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let started = Instant::now();
        let settings = cli.settings();
        settings.validate().context("invalid settings")?;
        let format = OutputFormat::from_json_flag(cli.json);
        let action = Action::from_cli(&cli);

        if cli.delete && cli.search.is_none() {
            warn!("--delete only applies together with --search; ignoring it");
        }

        let client = connect(&settings).await?;

        let status: Box<dyn Write> = match format {
            OutputFormat::Json => Box::new(io::stderr()),
            OutputFormat::Table => Box::new(io::stdout()),
        };
        let mut console = Console::new(io::stdin().lock(), io::stdout(), status, format, cli.yes);
        run(&client, &action, &settings, &mut console).await?;

        writeln!(
            console.status,
            "Total execution time: {:.2} seconds",
            started.elapsed().as_secs_f64()
        )?;
        Ok(())
    }

    async fn connect(settings: &Settings) -> Result<GmailApiClient> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build HTTP client")?;
        let store = FileCredentialStore::from_env(settings.token_cache_path.clone())
            .context("open credential cache")?;
        let auth = Authenticator::new(settings.credentials_path.clone(), Box::new(store));
        auth.authorize().await.with_context(|| {
            format!(
                "authenticate with client secrets {}",
                settings.credentials_path.display()
            )
        })?;

        Ok(GmailApiClient::new(http, auth)
            .with_user_id(settings.user_id.as_str())
            .with_retry_policy(settings.retry))
    }

    pub async fn run<A, R, W, S>(
        api: &A,
        action: &Action,
        settings: &Settings,
        console: &mut Console<R, W, S>,
    ) -> Result<()>
    where
        A: MailboxApi + ?Sized,
        R: BufRead,
        W: Write,
        S: Write,
    {
        match action {
            Action::Archive => handle_archive(api, settings, console).await,
            Action::MarkRead => handle_mark_read(api, settings, console).await,
            Action::Search {
                query,
                delete,
                limit,
            } => handle_search(api, settings, query, *delete, *limit, console).await,
            Action::Nothing => Ok(()),
        }
    }

    async fn handle_search<A, R, W, S>(
        api: &A,
        settings: &Settings,
        query: &str,
        delete: bool,
        limit: Option<usize>,
        console: &mut Console<R, W, S>,
    ) -> Result<()>
    where
        A: MailboxApi + ?Sized,
        R: BufRead,
        W: Write,
        S: Write,
    {
        let options = SearchOptions {
            page_size: settings.page_size,
            max_pages: settings.max_pages,
            limit,
        };

        let search_started = Instant::now();
        let outcome = search::search_messages(api, query, &options).await;
        writeln!(
            console.status,
            "Search completed in {:.2} seconds",
            search_started.elapsed().as_secs_f64()
        )?;
        let summaries = match outcome {
            Ok(summaries) => summaries,
            Err(error) => return console.service_error(error),
        };

        writeln!(console.status, "Total number of messages: {}", summaries.len())?;
        if summaries.is_empty() {
            return Ok(());
        }

        if console.confirm(PRINT_PROMPT, "y")? {
            let rendered = output::format_summaries(console.format, &summaries)?;
            writeln!(console.output, "{rendered}")?;
        }

        if delete && console.confirm(DELETE_PROMPT, "yes")? {
            let ids = search::message_ids(&summaries);
            let delete_started = Instant::now();
            let status = &mut console.status;
            let outcome = bulk::delete_messages(api, &ids, &BulkOptions::from(settings), |n| {
                let _ = writeln!(status, "Deleted {n} messages.");
            })
            .await;
            writeln!(
                console.status,
                "Batch delete completed in {:.2} seconds",
                delete_started.elapsed().as_secs_f64()
            )?;
            console.finish(outcome)?;
        }

        Ok(())
    }

    async fn handle_mark_read<A, R, W, S>(
        api: &A,
        settings: &Settings,
        console: &mut Console<R, W, S>,
    ) -> Result<()>
    where
        A: MailboxApi + ?Sized,
        R: BufRead,
        W: Write,
        S: Write,
    {
        let status = &mut console.status;
        let outcome = bulk::mark_all_read(api, &BulkOptions::from(settings), |n| {
            let _ = writeln!(status, "Marked {n} messages as read in this batch.");
        })
        .await;
        console.finish(outcome)
    }

    async fn handle_archive<A, R, W, S>(
        api: &A,
        settings: &Settings,
        console: &mut Console<R, W, S>,
    ) -> Result<()>
    where
        A: MailboxApi + ?Sized,
        R: BufRead,
        W: Write,
        S: Write,
    {
        let label_name = bulk::archive_label_name(&Local::now());
        let status = &mut console.status;
        let outcome = bulk::archive_inbox(api, &label_name, &BulkOptions::from(settings), |n| {
            let _ = writeln!(
                status,
                "Archived {n} messages and applied label '{label_name}' in this batch."
            );
        })
        .await;
        console.finish(outcome)
    }

}
