use anyhow::{bail, Context, Result};
use consolidation_service::{config::AppConfig, observability};
use sqlx::postgres::PgPoolOptions;
use std::env;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use turbine_client::{
    db::{asset_history, fetch_measurement},
    domain::MeasurementKey,
};

fn parse_ts(arg: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(arg, &Rfc3339).with_context(|| format!("'{arg}' is not an RFC 3339 timestamp"))
}

/// Prints consolidated rows as NDJSON.
///
/// `asset_history <asset_id> <ts>` prints the row for one key;
/// `asset_history <asset_id> <start> <end>` prints `[start, end)` plus a
/// summary line on stderr.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: asset_history <asset_id> <start_rfc3339> [end_rfc3339]");
    }
    let asset_id = args[1].trim().to_uppercase();
    let start = parse_ts(&args[2])?;

    let cfg = AppConfig::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.storage.max_connections)
        .connect(&cfg.storage.uri)
        .await?;

    let Some(end) = args.get(3) else {
        let key = MeasurementKey { asset_id, ts: start };
        match fetch_measurement(&pool, &key).await? {
            Some(row) => println!("{}", serde_json::to_string(&row)?),
            None => tracing::warn!(asset_id = %key.asset_id, ts = %key.ts, "no consolidated row for key"),
        }
        pool.close().await;
        return Ok(());
    };
    let end = parse_ts(end)?;

    let rows = asset_history(&pool, &asset_id, start, end).await?;
    for row in &rows {
        println!("{}", serde_json::to_string(row)?);
    }

    let winds: Vec<f64> = rows.iter().filter_map(|r| r.wind_ms).collect();
    let mean_wind = (!winds.is_empty()).then(|| winds.iter().sum::<f64>() / winds.len() as f64);
    let energy: f64 = rows.iter().filter_map(|r| r.energy_kwh).sum();
    let values: usize = rows.iter().map(|r| r.populated_fields()).sum();
    let outages = rows
        .iter()
        .filter(|r| r.is_planned_outage() || r.is_unplanned_outage())
        .count();
    eprintln!(
        "{asset_id}: {} rows, {values} values, energy {energy:.1} kWh, mean wind {}, {outages} outage rows",
        rows.len(),
        mean_wind.map_or_else(|| "n/a".to_string(), |w| format!("{w:.2} m/s")),
    );

    pool.close().await;
    Ok(())
}
