use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::path::PathBuf;
use tally::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_PARALLEL, EngineConfig};
use tally_dataverse::{DEFAULT_API_VERSION, DataverseConfig};

/// Column the report is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    /// Display name, falling back to the logical name.
    Display,
    /// Logical (schema) name.
    Logical,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns followed by failures and a summary line.
    Table,
    /// `Display Name;Schema Name;Count` rows.
    Csv,
    /// Rows, failures and run statistics as one JSON document.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Command-line and environment configuration for the `tally` binary.
///
/// Counts records of Dataverse entities with batched, parallel
/// `RetrieveTotalRecordCount` calls and prints the result to stdout. Logs go to
/// stderr and are filtered with `RUST_LOG`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tally",
    version,
    about = "Fast record counts for Dataverse entities"
)]
pub struct CliArgs {
    /// Organization URL, e.g. `https://contoso.crm.dynamics.com`.
    ///
    /// Environment variable: `DATAVERSE_URL`
    #[arg(long, env = "DATAVERSE_URL")]
    pub org_url: String,

    /// OAuth bearer token for the organization.
    ///
    /// Environment variable: `DATAVERSE_TOKEN`
    #[arg(long, env = "DATAVERSE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Web API version.
    ///
    /// Environment variable: `DATAVERSE_API_VERSION`
    #[arg(long, env = "DATAVERSE_API_VERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Number of count requests sent in one `$batch` call.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Number of `$batch` calls in flight at once. Each gets its own HTTP
    /// client.
    ///
    /// Environment variable: `MAX_PARALLEL`
    #[arg(long, env = "MAX_PARALLEL", default_value_t = DEFAULT_MAX_PARALLEL)]
    pub max_parallel: usize,

    /// Seconds before a `$batch` call is abandoned and all of its entities are
    /// reported as failed. `0` waits indefinitely.
    ///
    /// Environment variable: `BATCH_TIMEOUT_SECS`
    #[arg(long, env = "BATCH_TIMEOUT_SECS", default_value_t = 120)]
    pub batch_timeout_secs: u64,

    /// Comma-separated logical names to count.
    #[arg(long, value_delimiter = ',')]
    pub entities: Vec<String>,

    /// File with one `logical_name[;Display Name]` per line. Lines starting
    /// with `#` are ignored.
    #[arg(long)]
    pub entities_file: Option<PathBuf>,

    /// Count every entity of the organization.
    #[arg(long, default_value_t = false)]
    pub all_entities: bool,

    /// Order rows by this column. Rows keep selection order otherwise.
    #[arg(long, value_enum)]
    pub sort: Option<SortKey>,

    /// Sort in descending order.
    #[arg(long, default_value_t = false)]
    pub descending: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Count even if the organization reports a version older than 9.0.
    #[arg(long, default_value_t = false)]
    pub skip_version_check: bool,
}

/// Where the selection comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySource {
    List(Vec<String>),
    File(PathBuf),
    Catalog,
}

#[derive(Debug, Clone)]
pub struct RowOrder {
    pub key: Option<SortKey>,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dataverse: DataverseConfig,
    pub engine: EngineConfig,
    pub source: EntitySource,
    pub ordering: RowOrder,
    pub format: OutputFormat,
    pub log_format: LogFormat,
    pub skip_version_check: bool,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }
        if args.max_parallel == 0 {
            bail!("MAX_PARALLEL must be greater than 0");
        }

        let names: Vec<String> = args
            .entities
            .into_iter()
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect();

        let source = match (names.is_empty(), args.entities_file, args.all_entities) {
            (false, None, false) => EntitySource::List(names),
            (true, Some(path), false) => EntitySource::File(path),
            (true, None, true) => EntitySource::Catalog,
            (true, None, false) => {
                bail!("No entities given. Use --entities, --entities-file or --all-entities")
            }
            _ => bail!("--entities, --entities-file and --all-entities are mutually exclusive"),
        };

        let batch_timeout =
            (args.batch_timeout_secs > 0).then(|| Duration::from_secs(args.batch_timeout_secs));

        let engine = EngineConfig::default()
            .with_batch_size(args.batch_size)
            .with_max_parallel(args.max_parallel)
            .with_batch_timeout(batch_timeout);
        engine.validate()?;

        let mut dataverse = DataverseConfig::new(args.org_url)
            .with_api_version(args.api_version)
            .with_request_timeout(batch_timeout);
        if let Some(token) = args.token {
            dataverse = dataverse.with_token(token);
        }
        dataverse.validate()?;

        Ok(Self {
            dataverse,
            engine,
            source,
            ordering: RowOrder {
                key: args.sort,
                descending: args.descending,
            },
            format: args.format,
            log_format: args.log_format,
            skip_version_check: args.skip_version_check,
        })
    }
}
