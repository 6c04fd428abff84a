use std::sync::Arc;
use std::time::Duration;

use offq_connectivity::ConnectivityState;
use offq_contract::{MediaKind, ProgressEvent, UploadPayload};
use offq_queue::{BackoffPolicy, QueueConfig, QueueManager};
use offq_storage::MemoryRecordStore;
use offq_transfer::InMemoryTransferClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = Arc::new(InMemoryTransferClient::new());
    client.set_progress_steps(3);
    client.fail_next(2);

    let network = Arc::new(ConnectivityState::new(false));
    let queue = QueueManager::new(
        Arc::new(MemoryRecordStore::new()),
        client.clone(),
        network.clone(),
        QueueConfig {
            retry: BackoffPolicy {
                initial_delay_ms: 50,
                max_delay_ms: 200,
                factor: 2.0,
                max_attempts: 3,
            },
            redrain: None,
        },
    );

    queue.on_progress(|event: &ProgressEvent| {
        println!(
            "{} {:>9} {:>3}% retries={} outcome={:?}",
            event.id, event.status, event.progress, event.retry_count, event.outcome
        );
    });
    let listener = queue.start().await?;

    for (kind, name) in [(MediaKind::Image, "survey.jpg"), (MediaKind::Video, "walkthrough.mp4")] {
        queue
            .enqueue(UploadPayload::new(kind, name, vec![0u8; 4096]))
            .await?;
    }
    println!("offline: {:?}", queue.status().await?);

    network.set_reachable(true);
    while queue.status().await?.total > 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    println!(
        "delivered {} uploads in {} send attempts",
        client.delivered().len(),
        client.total_attempts()
    );
    listener.abort();
    Ok(())
}
