use std::{
    fmt::Display,
    io::{stdout, Write},
    sync::atomic::{AtomicBool, Ordering::SeqCst},
    time::Instant,
};

use crate::updater::TestingResult;

static CBCS: AtomicBool = AtomicBool::new(false);

pub fn ansi<T: Display, U: Display>(x: T, y: U) -> String {
    format!("\x1b[{y}m{x}\x1b[0m{}", esc())
}

pub fn clear_colours() {
    print!("{}", esc());
}

/// Colour-blind friendly scheme.
pub fn set_cbcs(val: bool) {
    CBCS.store(val, SeqCst)
}

pub fn num_cs() -> i32 {
    if CBCS.load(SeqCst) {
        35
    } else {
        36
    }
}

fn esc() -> &'static str {
    if CBCS.load(SeqCst) {
        "\x1b[38;5;225m"
    } else {
        ""
    }
}

pub fn report_update_started(testing_layers: usize, updater_layers: usize, replicas: usize, max_entry_count: usize) {
    clear_colours();
    println!("{}", ansi("Beginning Update", "34;1"));
    println!("Testing Layers         : {}", ansi(testing_layers, 31));
    println!("Updater Layers         : {}", ansi(updater_layers, 31));
    println!("Replicas               : {}", ansi(replicas, 31));
    println!("Entries / Macro-batch  : {}", ansi(max_entry_count, 31));
}

pub fn report_macro_batch_finished(macro_batch: usize, entries: usize, total_entries: usize, timer: &Instant) {
    let num_cs = num_cs();
    let elapsed = timer.elapsed().as_secs_f32();
    let entries_per_sec = total_entries as f32 / elapsed.max(f32::EPSILON);

    print!(
        "macro-batch {} | {} entries | {} total | {} entries/sec     \r",
        ansi(macro_batch, num_cs),
        ansi(entries, num_cs),
        ansi(total_entries, num_cs),
        ansi(format!("{entries_per_sec:.0}"), num_cs),
    );
    let _ = stdout().flush();
}

pub fn report_update_finished(results: &[TestingResult], timer: &Instant) {
    let num_cs = num_cs();
    println!();

    for (replica, result) in results.iter().enumerate() {
        println!(
            "replica {} | entries {} | mse {}",
            ansi(replica, num_cs),
            ansi(result.entry_count(), num_cs),
            ansi(format!("{:.6}", result.mse()), num_cs),
        );
    }

    println!("Update Time            : {}s", ansi(format!("{:.2}", timer.elapsed().as_secs_f32()), num_cs));
}

pub fn report_non_finite_error(replica: usize) {
    println!("{} replica {replica} accumulated a non-finite error", ansi("WARNING:", 31));
}
