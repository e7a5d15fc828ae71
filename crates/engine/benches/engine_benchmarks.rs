use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use forgecast_core::{OpportunityId, OrderId, Sku};
use forgecast_engine::{
    BlendedDemandModel, ConfirmedOrderLine, ForecastModel, InventorySnapshot, PipelineDemandLine,
    SalesHistoryPoint, SkuSignals, StageWeights, SupplyParameters,
};

fn signals(history_days: i64, pipeline_lines: usize) -> SkuSignals {
    let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    let sku = Sku::new("BENCH-1");
    SkuSignals {
        sku: sku.clone(),
        sales_history: (0..history_days)
            .map(|d| SalesHistoryPoint {
                sku: sku.clone(),
                date: today - Duration::days(d),
                units_sold: 3 + d % 7,
            })
            .collect(),
        pipeline: (0..pipeline_lines)
            .map(|i| PipelineDemandLine {
                opportunity_id: OpportunityId::new(format!("op-{i}")),
                sku: sku.clone(),
                expected_units: 100 + i as i64,
                stage: if i % 2 == 0 { "proposal" } else { "negotiation" }.to_string(),
                probability_override: (i % 5 == 0).then_some(35.0),
            })
            .collect(),
        confirmed_orders: (0..10)
            .map(|i| ConfirmedOrderLine {
                order_id: OrderId::new(format!("po-{i}")),
                sku: sku.clone(),
                quantity: 25,
                expected_fulfillment_date: (i % 3 != 0).then(|| today + Duration::days(i * 9)),
            })
            .collect(),
        inventory: InventorySnapshot::from_levels(sku, 400, 25, 100),
        supply: SupplyParameters {
            lead_time_days: 21,
            moq: 50,
            case_pack: 12,
            safety_stock: 40,
        },
    }
}

fn bench_forecast(c: &mut Criterion) {
    let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    let model = BlendedDemandModel::default();
    let weights = StageWeights::new().with("proposal", 30.0).with("negotiation", 60.0);

    let mut group = c.benchmark_group("sku_forecast");
    for (history, pipeline) in [(30, 5), (365, 50)] {
        let input = signals(history, pipeline);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{history}d_{pipeline}opps")),
            &input,
            |b, input| b.iter(|| model.forecast(black_box(input), &weights, today)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_forecast);
criterion_main!(benches);
