use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use stepper_core::config::Kinematics;
use stepper_core::dma::PulseStream;
use stepper_core::profile::{ProfileControls, StepAction, StepGenerator};
use stepper_core::step_table::{StepLevel, StepTable, TablePhase};

const PINS: [u8; 4] = [4, 5, 6, 7];
const TARGET: i64 = 20_000;

fn levels() -> Arc<[StepLevel]> {
    let half = [
        [1, 0, 0, 0],
        [1, 1, 0, 0],
        [0, 1, 0, 0],
        [0, 1, 1, 0],
        [0, 0, 1, 0],
        [0, 0, 1, 1],
        [0, 0, 0, 1],
        [1, 0, 0, 1],
    ];
    let full = [[1, 1, 0, 0], [0, 1, 1, 0], [0, 0, 1, 1], [1, 0, 0, 1]];
    let half = StepTable::pin_mask(&half, &PINS).expect("half-step table");
    let full = StepTable::pin_mask(&full, &PINS).expect("full-step table");
    vec![
        StepLevel::new(40.0, 2, half),
        StepLevel::new(120.0, 1, full.clone()),
        StepLevel::new(1e6, 1, full),
    ]
    .into()
}

fn generator(levels: &Arc<[StepLevel]>) -> StepGenerator {
    let kin = Kinematics {
        max_tps: 1000.0,
        accel_tps: 400.0,
        ustep_factor: 2,
        ..Kinematics::default()
    };
    let controls = Arc::new(ProfileControls::new(TARGET, kin.max_tps, kin.accel_tps));
    StepGenerator::new(controls, kin, Arc::clone(levels), 0)
}

pub fn bench_profile(c: &mut Criterion) {
    let mut g = c.benchmark_group("profile");
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p stepper_core --bench profile
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(30);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    let levels = levels();
    g.throughput(Throughput::Elements(TARGET as u64));

    g.bench_function("events_to_target", |b| {
        b.iter_batched(
            || generator(&levels),
            |mut gen| {
                let mut steps = 0u64;
                while let Some(ev) = gen.next_event() {
                    match ev.action {
                        StepAction::Step => steps += 1,
                        StepAction::Hold => break,
                        StepAction::ModeChange { .. } => {}
                    }
                }
                black_box(steps);
            },
            BatchSize::SmallInput,
        )
    });

    g.bench_function("pulses_to_target", |b| {
        b.iter_batched(
            || generator(&levels),
            |mut gen| {
                let last = PulseStream::new(&mut gen, &levels, TablePhase::default())
                    .take_while(|p| !p.is_hold())
                    .last();
                black_box(last);
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

criterion_group!(profile, bench_profile);
criterion_main!(profile);
