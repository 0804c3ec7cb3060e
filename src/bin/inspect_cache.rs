use anyhow::{Context, Result};
use clap::Parser;
use partner_etl::core::parser::parse_partners;
use partner_etl::domain::model::CacheEntry;
use partner_etl::utils::logger;
use partner_etl::LocationKey;
use std::path::PathBuf;

/// 檢查快取內容：解析一筆快取 (或存下來的 HTML) 並列出找到的合作夥伴
#[derive(Parser)]
#[command(name = "inspect_cache")]
#[command(about = "Parse a cached partner response and print the partners it contains")]
struct Args {
    /// Cache entry (`<storage_id>.json`) or a raw HTML response
    path: PathBuf,

    /// Location used for raw HTML files, e.g. `US,TX,El Paso`
    #[arg(long, default_value = "XX,XX")]
    location: String,

    /// Print records as JSON instead of a listing
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let content = std::fs::read_to_string(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;

    let (key, payload, fetched_at) = if is_json(&args.path, &content) {
        let entry: CacheEntry = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a cache entry", args.path.display()))?;
        (entry.key, entry.payload, Some(entry.fetched_at))
    } else {
        (location_from_arg(&args.location)?, content, None)
    };

    println!("📍 Location: {} ({})", key, key.storage_id());
    if let Some(fetched_at) = fetched_at {
        println!("🕒 Fetched at: {}", fetched_at.to_rfc3339());
    }
    println!("📄 Payload: {} bytes", payload.len());

    let records = parse_partners(&payload, &key)
        .with_context(|| format!("parsing payload for {}", key))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("✅ {} partner(s)", records.len());
    for (i, record) in records.iter().enumerate() {
        println!(
            "{:>3}. [{}] {} ({})",
            i + 1,
            record.partner_id,
            record.company_name,
            record.partner_level
        );
        println!("     tel: {}  web: {}", record.telephone, record.website);
        println!("     {}", record.address);
    }

    Ok(())
}

fn is_json(path: &std::path::Path, content: &str) -> bool {
    path.extension().is_some_and(|ext| ext == "json") || content.trim_start().starts_with('{')
}

/// `CC,RC[,City]`; names default to the codes.
fn location_from_arg(arg: &str) -> Result<LocationKey> {
    let parts: Vec<&str> = arg.split(',').map(str::trim).collect();
    let (cc, rc) = match parts.as_slice() {
        [cc, rc, ..] => (*cc, *rc),
        _ => anyhow::bail!("--location must look like CC,RC[,City], got '{}'", arg),
    };
    let city = parts.get(2).copied();
    LocationKey::new(cc, cc, rc, rc, city).map_err(|e| anyhow::anyhow!("invalid --location: {}", e))
}
