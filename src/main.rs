//! Choropleth regions - development entry point
//!
//! Matches a dataset against a region mapping on disk and prints the match
//! report and the legend.
//!
//! Usage:
//! ```bash
//! choropleth_regions <regionMapping.json> <dataset.json> \
//!     [--type STE] [--column state] [--style style.json]
//! ```
//!
//! The dataset is a JSON object of column name → array of values. Region ID
//! lists are resolved relative to the mapping file's directory.

use anyhow::{bail, Context};
use choropleth_regions::config::TableStyle;
use choropleth_regions::legend::{color_array_to_css, LegendHelper};
use choropleth_regions::logging;
use choropleth_regions::region::{FileFetcher, RegionFetcher, RegionProviderList};
use choropleth_regions::table::TableColumn;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// How many matched regions to list in the report
const SAMPLE_REGIONS: usize = 10;

#[derive(Debug, Default)]
struct Args {
    mapping: String,
    dataset: String,
    region_type: Option<String>,
    column: Option<String>,
    style: Option<String>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut positional = Vec::new();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{} requires a value", flag))
        };
        match arg.as_str() {
            "--type" => parsed.region_type = Some(value("--type")?),
            "--column" => parsed.column = Some(value("--column")?),
            "--style" => parsed.style = Some(value("--style")?),
            other => positional.push(other.to_string()),
        }
    }
    match positional.as_slice() {
        [mapping, dataset] => {
            parsed.mapping = mapping.clone();
            parsed.dataset = dataset.clone();
            Ok(parsed)
        }
        _ => bail!(
            "Usage: choropleth_regions <regionMapping.json> <dataset.json> \
             [--type TYPE] [--column NAME] [--style style.json]"
        ),
    }
}

async fn read_columns(path: &str) -> anyhow::Result<Vec<TableColumn>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading dataset {}", path))?;
    let document: serde_json::Value = serde_json::from_str(&text)?;
    let Some(object) = document.as_object() else {
        bail!("Dataset must be a JSON object of column name to values");
    };
    object
        .iter()
        .map(|(name, values)| match values.as_array() {
            Some(values) => Ok(TableColumn::from_json_values(name, values)),
            None => bail!("Column '{}' is not an array", name),
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logging::init_logging() {
        eprintln!("Failed to initialise logging: {}", e);
    }
    let start = Instant::now();
    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args)?;

    let style = match &args.style {
        Some(path) => TableStyle::from_json(
            &tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading style {}", path))?,
        )?,
        None => TableStyle::default(),
    };

    // Region mapping and ID lists
    let mapping_path = Path::new(&args.mapping);
    let base_dir = mapping_path.parent().unwrap_or_else(|| Path::new("."));
    let mapping_file = mapping_path
        .file_name()
        .and_then(|f| f.to_str())
        .context("region mapping path has no file name")?;
    let fetcher: Arc<dyn RegionFetcher> = Arc::new(FileFetcher::new(base_dir));
    let providers = RegionProviderList::from_url(mapping_file, fetcher)
        .await
        .context("loading region mapping")?;
    info!(providers = providers.len(), "Region mapping loaded");

    let columns = read_columns(&args.dataset).await?;
    let names: Vec<&str> = columns.iter().map(TableColumn::name).collect();
    let details = providers.get_region_details(
        &names,
        args.column.as_deref(),
        args.region_type.as_deref(),
    )?;
    let Some(detail) = details.first() else {
        bail!("No region column found among {:?}", names);
    };
    let provider = &detail.region_provider;
    info!(
        region_type = %provider.region_type(),
        column = %detail.variable_name,
        disambig_column = ?detail.disambig_variable_name,
        "Region column identified"
    );

    provider.load_region_ids().await?;

    let labels_of = |name: &str| {
        columns
            .iter()
            .find(|c| c.name() == name)
            .map(TableColumn::labels)
    };
    let region_codes = labels_of(&detail.variable_name).unwrap_or_default();
    let disambig_codes = detail
        .disambig_variable_name
        .as_deref()
        .and_then(|name| labels_of(name));

    let mut failed = Vec::new();
    let mut ambiguous = Vec::new();
    let region_rows = provider.map_regions_to_indices_into(
        &region_codes,
        disambig_codes.as_deref(),
        Some(&mut failed),
        Some(&mut ambiguous),
        None,
    )?;
    let matched = region_rows.iter().filter(|row| row.is_some()).count();

    println!("Region type: {}", provider.region_type());
    println!("Regions: {}", provider.region_count());
    println!("Rows: {}", region_codes.len());
    println!("Regions with data: {}", matched);
    println!("Failed matches: {}", failed.len());
    for row in &failed {
        println!("  row {}: {:?}", row, region_codes[*row]);
    }
    if !ambiguous.is_empty() {
        warn!(rows = ?ambiguous, "Ambiguous region matches");
        println!("Ambiguous matches: {}", ambiguous.len());
    }

    // First column that is neither the region nor the disambiguation column
    let value_column = columns.iter().find(|c| {
        c.name() != detail.variable_name
            && Some(c.name()) != detail.disambig_variable_name.as_deref()
    });
    let mut helper = LegendHelper::new(style)?
        .with_region_provider(Arc::clone(provider))
        .with_name(provider.region_type());
    if let Some(column) = value_column {
        helper = helper.with_column(column.clone());
    }
    let value_labels = value_column.map(TableColumn::labels);

    println!();
    for (region_index, row) in region_rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| row.map(|row| (i, row)))
        .take(SAMPLE_REGIONS)
    {
        let color = match &value_labels {
            Some(labels) => helper.get_color_array_from_category(labels[row].as_deref()),
            None => helper.get_color_array_from_value(Some(region_index as f64)),
        };
        let id = provider.regions()[region_index].id.as_deref().unwrap_or("");
        println!("  {} ← row {}: {}", id, row, color_array_to_css(color));
    }

    match helper.legend() {
        Some(legend) => println!("\nLegend:\n{}", legend.to_json()?),
        None => println!("\nNo legend"),
    }

    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Done");
    Ok(())
}
