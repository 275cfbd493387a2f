use sluice_core::catalog::MemoryCatalog;
use sluice_core::config::LeasesConfig;
use sluice_core::lease_store::MemoryLeaseStore;
use sluice_core::{logging, Assignment, LeaseService, WorkerKey};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing("info");

    let catalog = MemoryCatalog::with_pending(1..=6);
    let service = LeaseService::new(
        MemoryLeaseStore::new(),
        catalog.clone(),
        &LeasesConfig::default(),
    );

    let alpha = WorkerKey::new("10.0.0.1", "alpha");
    let beta = WorkerKey::new("10.0.0.2", "beta");

    let claimed = service.claim_work(alpha.clone(), 3).await?;
    println!("{} claimed {:?}", alpha, claimed);
    let claimed = service.claim_work(beta.clone(), 3).await?;
    println!("{} claimed {:?}", beta, claimed);

    // alpha finishes its first item, reports it, then goes away
    catalog.complete(1);
    service
        .heartbeat(alpha.clone(), 1, None, Assignment::Unchanged)
        .await?;
    let outcome = service.remove_worker(&alpha).await?;
    println!("removed {}: {:?}", alpha, outcome);
    println!("reserved now {:?}", service.reserved_ids().await?);

    let stats = service.aggregate_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
