//! Subcommand implementations.

use anyhow::Result;
use serde_json::{json, Value};
use sprest_core::{
    combine_paths, CachingOptions, ODataDefaultParser, ResourceAddress, SpRestClient, StoreKind,
};
use tracing::info;

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn local_caching() -> CachingOptions {
    CachingOptions::new().with_store(StoreKind::Local)
}

pub async fn get(client: &SpRestClient, path: &str, cache: bool) -> Result<()> {
    let mut request = client.request(
        &ResourceAddress::parse(path),
        ODataDefaultParser::<Value>::new(),
    );
    if cache {
        request = request.using_caching(local_caching());
    }
    let value = request.issue()?.await?;
    print_json(&value)
}

/// Run every path as a GET in one batch and print one entry per path, in
/// order. A failing part is printed as an error entry; the command only fails
/// when the batch as a whole does.
pub async fn batch(
    client: &SpRestClient,
    site: &str,
    paths: &[String],
    cache: bool,
) -> Result<()> {
    let batch = client.create_batch(site);

    let mut handles = Vec::with_capacity(paths.len());
    for path in paths {
        let mut request = client
            .request(&ResourceAddress::parse(path), ODataDefaultParser::<Value>::new())
            .in_batch(&batch)?;
        if cache {
            request = request.using_caching(local_caching());
        }
        handles.push(request.issue()?);
    }

    info!(
        "Sending {} of {} requests in batch {}",
        batch.len(),
        paths.len(),
        batch.id()
    );
    batch.execute().await?;

    let results = futures::future::join_all(handles).await;
    let entries: Vec<Value> = paths
        .iter()
        .zip(results)
        .map(|(path, result)| match result {
            Ok(value) => json!({ "path": path, "result": value }),
            Err(e) => json!({ "path": path, "error": e.to_string(), "status": e.status() }),
        })
        .collect();
    print_json(&Value::Array(entries))
}

pub async fn digest(client: &SpRestClient, site: &str) -> Result<()> {
    let digest = client.get_credential(&combine_paths(&[site, "_api/web"])).await?;
    println!("{}", digest);
    Ok(())
}
