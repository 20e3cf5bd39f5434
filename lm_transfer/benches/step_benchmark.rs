//! Transfer step benchmark - cost of the per-cycle handshake work.
//!
//! One machine step must stay far below the bus cycle (1 ms default).
//! Measures a single setpoint step and a complete write session driven by
//! an ideal device answering every control word on the next cycle.

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use lm_common::consts::DESCRIPTOR_WORDS;
use lm_common::curve::{CurveDescriptor, PositionTimeCurve};
use lm_transfer::transfer::{CycleInput, Phase, StepOutcome, TransferMachine};

fn curve(points: usize) -> PositionTimeCurve {
    let setpoints = (0..points).map(|i| (i as f64 * 0.01).sin() * 20.0).collect();
    PositionTimeCurve::with_setpoints("bench", 1, 0.001, setpoints).unwrap()
}

/// Status an ideal device reports after the machine's last output.
fn ideal_reply(machine: &TransferMachine, advance: bool) -> CycleInput {
    CycleInput {
        status_word: if advance {
            machine.next_mode_status()
        } else {
            machine.expected_status()
        },
        value_in: 0,
    }
}

/// Run a write session to completion. Returns the number of steps.
#[inline(never)]
fn write_session(mut machine: TransferMachine, words: usize, points: usize) -> u32 {
    let mut steps = 0u32;
    let mut sent_in_phase = 0usize;
    machine.step(CycleInput::default());
    loop {
        let advance = match machine.phase() {
            Phase::Init | Phase::SendCommand => true,
            Phase::CurveInfo => sent_in_phase >= words,
            Phase::Setpoints => sent_in_phase >= points,
            _ => true,
        };
        let out = machine.step(ideal_reply(&machine, advance));
        steps += 1;
        sent_in_phase = if out.phase_changed { 1 } else { sent_in_phase + 1 };
        if matches!(out.outcome, StepOutcome::Finished | StepOutcome::Failed(_)) {
            return steps;
        }
    }
}

/// Machine positioned in the setpoint phase of a write session.
fn in_setpoints(points: usize) -> TransferMachine {
    let mut machine = TransferMachine::write(curve(points), 1000).unwrap();
    machine.step(CycleInput::default());
    let mut sent = 0usize;
    while machine.phase() != Phase::Setpoints {
        let advance = machine.phase() != Phase::CurveInfo || sent >= DESCRIPTOR_WORDS;
        let out = machine.step(ideal_reply(&machine, advance));
        sent = if out.phase_changed { 1 } else { sent + 1 };
    }
    machine
}

fn bench_single_step(c: &mut Criterion) {
    let machine = in_setpoints(1000);
    c.bench_function("step_setpoint", |b| {
        b.iter_batched(
            || machine.clone(),
            |mut m| {
                let input = ideal_reply(&m, false);
                black_box(m.step(black_box(input)))
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_write_session(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_session");
    group.sample_size(50);

    for &points in &[100usize, 1000, 10_000] {
        let machine = TransferMachine::write(curve(points), 1000).unwrap();
        group.bench_with_input(BenchmarkId::new("setpoints", points), &points, |b, &n| {
            b.iter_batched(
                || machine.clone(),
                |m| black_box(write_session(m, DESCRIPTOR_WORDS, n)),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_descriptor_words(c: &mut Criterion) {
    let descriptor = curve(500).curve_info().unwrap();
    c.bench_function("descriptor_words_round_trip", |b| {
        b.iter(|| {
            let words = black_box(&descriptor).to_words();
            black_box(CurveDescriptor::from_words(&words))
        });
    });
}

criterion_group!(
    benches,
    bench_single_step,
    bench_write_session,
    bench_descriptor_words
);
criterion_main!(benches);
