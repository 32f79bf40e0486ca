//! End-to-end demo: validate an order graph against a manifest.

use std::sync::Arc;

use async_trait::async_trait;
use veritor_core::{
    accessor, collection_items, identity, DependencyRef, Manifest, ManifestValue, RuleContext,
    RuleDefinition, RuleLogic, Value, ValueRule, Verdict,
};
use veritor_execution::Validator;

#[derive(Clone)]
struct OrderLine {
    sku: String,
    quantity: i64,
    unit_price_cents: i64,
}

struct Order {
    reference: String,
    lines: Vec<OrderLine>,
}

/// A string value must be non-empty.
struct NotEmpty;

#[async_trait]
impl ValueRule for NotEmpty {
    async fn evaluate(&self, value: &Value, _ctx: &RuleContext) -> anyhow::Result<Verdict> {
        let text = value
            .downcast_ref::<String>()
            .ok_or_else(|| anyhow::anyhow!("expected a string"))?;
        Ok(if text.is_empty() { Verdict::fail() } else { Verdict::pass() })
    }

    fn parallel_safe(&self) -> bool {
        true
    }
}

/// An order line must request at least one unit.
struct PositiveQuantity;

#[async_trait]
impl ValueRule for PositiveQuantity {
    async fn evaluate(&self, value: &Value, _ctx: &RuleContext) -> anyhow::Result<Verdict> {
        let line = value
            .downcast_ref::<OrderLine>()
            .ok_or_else(|| anyhow::anyhow!("expected an order line"))?;
        Ok(if line.quantity > 0 {
            Verdict::pass()
        } else {
            Verdict::fail_with(serde_json::json!({ "quantity": line.quantity }))
        })
    }
}

/// Line total must stay under a ceiling. Only meaningful for lines
/// that already have a sane quantity, hence the dependency.
struct LineTotalUnderLimit {
    limit_cents: i64,
}

#[async_trait]
impl ValueRule for LineTotalUnderLimit {
    async fn evaluate(&self, value: &Value, _ctx: &RuleContext) -> anyhow::Result<Verdict> {
        let line = value
            .downcast_ref::<OrderLine>()
            .ok_or_else(|| anyhow::anyhow!("expected an order line"))?;
        let total = line.quantity * line.unit_price_cents;
        Ok(if total <= self.limit_cents {
            Verdict::pass()
        } else {
            Verdict::fail_with(serde_json::json!({ "total_cents": total }))
        })
    }
}

fn manifest() -> Manifest {
    let line = ManifestValue::root()
        .with_identity(identity(|line: &OrderLine| line.sku.clone().into()))
        .with_rule(RuleDefinition::new(RuleLogic::for_value(PositiveQuantity)))
        .with_rule(
            RuleDefinition::new(RuleLogic::for_value(LineTotalUnderLimit { limit_cents: 100_000 }))
                .depends_on(DependencyRef::same_value("PositiveQuantity")),
        );

    Manifest::new(
        ManifestValue::root()
            .with_child(
                ManifestValue::member("reference", accessor(|o: &Order| o.reference.clone()))
                    .with_rule(RuleDefinition::new(RuleLogic::for_value(NotEmpty))),
            )
            .with_child(
                ManifestValue::member("lines", accessor(|o: &Order| o.lines.clone()))
                    .with_collection(veritor_core::CollectionSpec::new(
                        line,
                        collection_items(|lines: &Vec<OrderLine>| lines.clone()),
                    )),
            ),
    )
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let order = Order {
        reference: "ORD-2024-0117".into(),
        lines: vec![
            OrderLine { sku: "KB-87".into(), quantity: 2, unit_price_cents: 8_900 },
            OrderLine { sku: "MON-27".into(), quantity: 0, unit_price_cents: 32_900 },
            OrderLine { sku: "GPU-X".into(), quantity: 4, unit_price_cents: 104_500 },
        ],
    };

    let run = Validator::new().validate(&manifest(), Arc::new(order)).await?;

    println!("run {} => passed: {}", run.run_id, run.passed());
    for result in &run.results {
        println!(
            "  {:<18} {} {}",
            format!("{:?}", result.outcome),
            result.rule,
            result.data.as_ref().map(|d| d.to_string()).unwrap_or_default(),
        );
    }

    Ok(())
}
