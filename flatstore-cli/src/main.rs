use clap::{Parser, Subcommand, ValueEnum};
use flatstore::aggregate::AggregateRequest;
use flatstore::store::bulk::BulkOperationRequest;
use flatstore::{
    CancellationToken, FlatStoreError, Predicate, QueryOptions, SortDirection, Store, StoreConfig,
};
use std::path::PathBuf;
use std::process;

/// flatstore CLI: query and edit CSV-backed collections from the command line
#[derive(Parser)]
#[command(name = "flatstore", version, about)]
struct Cli {
    /// Directory holding the collection files (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List collection names
    Collections,

    /// List records in a collection
    List {
        /// Collection name
        collection: String,
        /// JSON filter (e.g. --filter '{"field":"age","operator":"gt","value":30}')
        #[arg(long)]
        filter: Option<String>,
        /// Field to sort by
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long)]
        desc: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Comma-separated fields to return
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Get a single record by ID
    Get {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
    },

    /// Create a new record
    Create {
        /// Collection name
        collection: String,
        /// Field values (e.g. --field name="Alice Chen")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Update an existing record
    Update {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
        /// Field values to update (e.g. --field status=shipped)
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Delete a record
    Delete {
        /// Collection name
        collection: String,
        /// Record ID
        id: String,
    },

    /// Show the effective schema of a collection
    Schema {
        /// Collection name
        collection: String,
    },

    /// Count distinct values of a field
    Summary {
        /// Collection name
        collection: String,
        /// Field name
        field: String,
    },

    /// Group and aggregate records
    Aggregate {
        /// Collection name
        collection: String,
        /// JSON request: {"groupBy": [...], "filter": {...}, "aggregates": [...]}
        #[arg(long)]
        request: String,
    },

    /// Create, update or delete many records at once
    Bulk {
        /// Collection name
        collection: String,
        /// JSON request: {"action": "...", "atomic": true, "records": [...]}
        #[arg(long)]
        request: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        // Machine-readable error on stderr
        eprintln!("ERROR:{}:{e}", e.kind().as_str());
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> flatstore::Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_yaml_file(path)?,
        None => StoreConfig::new("."),
    };
    if let Some(dir) = &cli.data_dir {
        config.base_dir = dir.clone();
    }
    log::debug!("Using data directory {}", config.base_dir.display());
    Ok(config)
}

fn run(cli: Cli) -> flatstore::Result<()> {
    let store = Store::open(load_config(&cli)?)?;
    let cancel = CancellationToken::new();

    let output = match cli.command {
        Command::Collections => serde_json::to_value(store.list_collections()?)?,

        Command::List {
            collection,
            filter,
            sort,
            desc,
            limit,
            offset,
            fields,
        } => {
            let mut options = QueryOptions::new().page(offset, limit);
            if let Some(filter) = filter {
                options = options.filter(Predicate::from_json(&serde_json::from_str(&filter)?)?);
            }
            if let Some(field) = sort {
                let direction = if desc { SortDirection::Desc } else { SortDirection::Asc };
                options = options.sort_by(field, direction);
            }
            if !fields.is_empty() {
                options = options.select(fields);
            }
            serde_json::to_value(store.list(&collection, &options, &cancel)?)?
        }

        Command::Get { collection, id } => {
            serde_json::to_value(store.get(&collection, &id, &cancel)?)?
        }

        Command::Create { collection, fields } => {
            let record = store.create(&collection, fields_to_value(&fields), &cancel)?;
            serde_json::to_value(record)?
        }

        Command::Update {
            collection,
            id,
            fields,
        } => {
            let record = store.update(&collection, &id, fields_to_value(&fields), &cancel)?;
            serde_json::to_value(record)?
        }

        Command::Delete { collection, id } => {
            store.delete(&collection, &id, &cancel)?;
            serde_json::json!({ "ok": true, "deleted": id })
        }

        Command::Schema { collection } => {
            serde_json::to_value(store.get_schema(&collection, &cancel)?)?
        }

        Command::Summary { collection, field } => {
            serde_json::to_value(store.summary(&collection, &field, &cancel)?)?
        }

        Command::Aggregate {
            collection,
            request,
        } => {
            let request: AggregateRequest = serde_json::from_str(&request)?;
            serde_json::to_value(store.aggregate(&collection, &request, &cancel)?)?
        }

        Command::Bulk {
            collection,
            request,
        } => {
            let request: BulkOperationRequest = serde_json::from_str(&request)?;
            serde_json::to_value(store.bulk(&collection, &request, &cancel)?)?
        }
    };

    print_output(&output, &cli.format)
}

fn print_output(value: &serde_json::Value, format: &OutputFormat) -> flatstore::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(value)
                .map_err(|e| FlatStoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            print!("{yaml}");
        }
    }
    Ok(())
}

fn fields_to_value(fields: &[(String, String)]) -> flatstore::Fields {
    let mut map = flatstore::Fields::new();
    for (key, val) in fields {
        // Try to parse as JSON value (for numbers, booleans, arrays, objects)
        let json_val = serde_json::from_str(val).unwrap_or(serde_json::Value::String(val.clone()));
        map.insert(key.clone(), json_val.into());
    }
    map
}
