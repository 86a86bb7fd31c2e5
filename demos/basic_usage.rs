// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic mirror-sync usage example.
//!
//! Demonstrates:
//! 1. Starting the engine against the in-memory document store
//! 2. Replicating one request's worth of mutations (posts, fields, options)
//! 3. Deleting within a later request
//! 4. Running a reconciliation scan for content written behind our back
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Value};

use mirror_sync::settings::keys;
use mirror_sync::{
    Collaborators, CollectionRef, Document, DriverRegistry, EngineState, Entity, EntityKind, HostTenantContext,
    InMemoryContentStore, InMemoryDocumentStore, MirrorConfig, MirrorSync, MutationEvent, StaticSettings,
};

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║            mirror-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring mirror-sync...");

    let settings = StaticSettings::new();
    settings.set(keys::CONNECTION_URI, json!("memory://demo"));
    settings.set(keys::OBJECT_TYPES, json!(["post", "page"]));
    settings.set(keys::OBJECT_STATUS, json!(["publish"]));
    settings.set(keys::TAXONOMY_TYPES, json!(["category"]));

    let content = Arc::new(InMemoryContentStore::new());
    let docs = Arc::new(InMemoryDocumentStore::new());
    let collaborators = Collaborators::new(Arc::new(settings), Arc::new(HostTenantContext::new(1)), content.clone());

    let mut engine = MirrorSync::new(MirrorConfig::default(), collaborators, DriverRegistry::with_memory(docs.clone()));
    println!("   State: {:?}", engine.state());

    println!("\n🚀 Starting engine...");
    engine.start().await?;
    assert_eq!(engine.state(), EngineState::Running);
    println!("   ✅ Engine running! State: {:?}", engine.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. One request: several mutations, one flush
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Request #1: saving posts, a field and an option...");

    let events = vec![
        MutationEvent::EntitySaved {
            kind: EntityKind::ContentItem,
            entity: Entity::post(1, "post", "publish", doc(json!({"post_title": "Hello world"}))),
        },
        MutationEvent::EntitySaved {
            kind: EntityKind::ContentItem,
            entity: Entity::post(2, "page", "publish", doc(json!({"post_title": "About"}))),
        },
        // Drafts are not on the allow-list
        MutationEvent::EntitySaved {
            kind: EntityKind::ContentItem,
            entity: Entity::post(3, "post", "draft", doc(json!({"post_title": "WIP"}))),
        },
        MutationEvent::FieldUpdated {
            kind: EntityKind::ContentItemField,
            field_id: 10,
            owner_id: 1,
            key: "subtitle".into(),
            value: json!("First post"),
        },
        MutationEvent::option_updated("blogname", json!("Demo Blog")),
    ];

    let mut buffer = engine.begin_request();
    for event in events {
        let kind = event.kind();
        let disposition = engine.dispatch(&mut buffer, event).await?;
        println!("   └─ {kind}: {disposition:?}");
    }
    println!("   Buffered: {} records", buffer.len());

    let report = engine.finish_request(buffer).await?;
    let totals = report.totals();
    println!(
        "   ✅ Flushed in {:?}: {} succeeded, {} failed, {} skipped",
        report.duration, totals.succeeded, totals.failed, totals.skipped
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 3. A later request deletes the page
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🗑️  Request #2: deleting the page...");
    let mut buffer = engine.begin_request();
    engine
        .dispatch(
            &mut buffer,
            MutationEvent::EntityDeleting {
                kind: EntityKind::ContentItem,
                entity: Entity::post(2, "page", "publish", Document::new()),
            },
        )
        .await?;
    let report = engine.finish_request(buffer).await?;
    println!("   ✅ Success: {}", report.is_success());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Reconciliation: content the notifications never saw
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔁 Reconciliation scan...");
    for id in 100..103 {
        content.insert_entity(
            1,
            EntityKind::ContentItem,
            Entity::post(id, "post", "publish", doc(json!({"post_title": format!("Imported {id}")}))),
        );
    }
    let scan = engine.run_scan(EntityKind::ContentItem).await?;
    println!(
        "   └─ found={} enqueued={} upserted={} untracked={}",
        scan.found, scan.enqueued, scan.upserted, scan.untracked
    );

    println!("\n📖 Document store contents:");
    for collection in docs.collections() {
        let stored = docs.find(&collection, &Document::new());
        println!("   ┌─ {}.{} ({} documents)", collection.database, collection.name, stored.len());
        for document in stored {
            println!("   │  └─ {}", Value::Object(document));
        }
    }
    let posts = CollectionRef::new("wordpress", "wp_posts");
    println!("   Posts replicated: {}", docs.len(&posts));

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ Shutdown complete! State: {:?}", engine.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by type and sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.0}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, labels, count, sum) in &histograms {
            println!("      └─ {}{} count={} sum={:.4}", name, labels, count, sum);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
