/// Model Bench: offline validation CLI for NeuralFX weight files and the
/// Markov note generator.
///
/// Usage:
///   model-bench info [--model FILE] [--json]
///   model-bench gain [--model FILE] [--freq F] [--amplitude A] [--control C] [--sr SR]
///   model-bench sweep [--model FILE] [--steps N] [--freq F] [--amplitude A] [--csv FILE]
///   model-bench trace [--model FILE] --input X1,X2,... [--control C]
///   model-bench bench [--model FILE] [--seconds S] [--sr SR] [--block N] [--channels C]
///   model-bench markov --midi FILE [--order K] [--length N] [--seed S] [--track T]
///
/// Without `--model`, the bundled drive model is used.
use std::error::Error;
use std::f64::consts::PI;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use midly::{MidiMessage, Smf, TrackEventKind};
use neuralfx_dsp::markov::{MarkovChain, REST_TOKEN};
use neuralfx_dsp::model::InferenceModel;
use neuralfx_dsp::stream::{AudioEffect, StreamConfig, StreamProcessor};
use neuralfx_dsp::weights::{LoaderConfig, WeightBlob};
use tracing_subscriber::EnvFilter;

type CmdResult = Result<(), Box<dyn Error>>;

const BUNDLED_MODEL: &str = include_str!("../../../models/amp-drive.json");
const DEFAULT_SR: f64 = 48_000.0;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::FAILURE;
    }

    let result = match args[1].as_str() {
        "info" => cmd_info(&args[2..]),
        "gain" => cmd_gain(&args[2..]),
        "sweep" => cmd_sweep(&args[2..]),
        "trace" => cmd_trace(&args[2..]),
        "bench" => cmd_bench(&args[2..]),
        "markov" => cmd_markov(&args[2..]),
        _ => {
            eprintln!("Unknown subcommand: {}", args[1]);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!("Model Bench: NeuralFX model and generator validation");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  info     Print topology and parameter count of a weight file");
    eprintln!("  gain     Measure small-signal gain with a sine input");
    eprintln!("  sweep    Gain across the control range");
    eprintln!("  trace    Step the model over explicit input samples");
    eprintln!("  bench    Real-time factor of block processing");
    eprintln!("  markov   Train a Markov chain on a MIDI file and print a walk");
}

fn parse_flag(args: &[String], flag: &str, default: f64) -> f64 {
    for i in 0..args.len().saturating_sub(1) {
        if args[i] == flag {
            return args[i + 1].parse().unwrap_or(default);
        }
    }
    default
}

fn parse_flag_str<'a>(args: &'a [String], flag: &str, default: &'a str) -> &'a str {
    for i in 0..args.len().saturating_sub(1) {
        if args[i] == flag {
            return &args[i + 1];
        }
    }
    default
}

fn load_model(args: &[String]) -> Result<Arc<WeightBlob>, Box<dyn Error>> {
    let path = parse_flag_str(args, "--model", "");
    let loader = LoaderConfig::default();
    let blob = if path.is_empty() {
        WeightBlob::parse_inferred(BUNDLED_MODEL, &loader)?
    } else {
        WeightBlob::open_inferred(path, &loader)?
    };
    Ok(Arc::new(blob))
}

// ─── Info ───────────────────────────────────────────────────────────────────

fn cmd_info(args: &[String]) -> CmdResult {
    let blob = load_model(args)?;
    let t = *blob.topology();
    let model = InferenceModel::new(Arc::clone(&blob))?;

    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&t)?);
        return Ok(());
    }

    println!("Model");
    println!("  Input:       {}", t.input_size);
    println!("  Hidden:      {}", t.hidden_size);
    println!("  Layers:      {}", t.layer_count);
    println!("  Output:      {}", t.output_size);
    println!("  Layout:      {:?}", model.layout());
    println!("  Parameters:  {}", blob.parameter_count());
    Ok(())
}

// ─── Gain measurement ───────────────────────────────────────────────────────

/// Peak output over peak input for a sine, after a settling period.
fn measure_gain_at(
    model: &mut InferenceModel,
    freq: f64,
    amplitude: f64,
    control: f32,
    sr: f64,
) -> f64 {
    model.reset();

    let n_settle = (sr * 0.3) as usize;
    let n_measure = (sr * 0.2) as usize;

    for i in 0..n_settle {
        let t = i as f64 / sr;
        let input = amplitude * (2.0 * PI * freq * t).sin();
        model.step(input as f32, control);
    }

    let mut peak = 0.0f64;
    for i in 0..n_measure {
        let t = (n_settle + i) as f64 / sr;
        let input = amplitude * (2.0 * PI * freq * t).sin();
        let y = model.step(input as f32, control) as f64;
        peak = peak.max(y.abs());
    }

    peak / amplitude
}

fn cmd_gain(args: &[String]) -> CmdResult {
    let freq = parse_flag(args, "--freq", 1000.0);
    let amplitude = parse_flag(args, "--amplitude", 0.1);
    let control = parse_flag(args, "--control", 0.5) as f32;
    let sr = parse_flag(args, "--sr", DEFAULT_SR);

    let mut model = InferenceModel::new(load_model(args)?)?;
    let gain = measure_gain_at(&mut model, freq, amplitude, control, sr);
    let gain_db = 20.0 * gain.max(1e-12).log10();

    println!("Gain measurement");
    println!("  Frequency:   {freq:.0} Hz");
    println!("  Amplitude:   {amplitude:.4}");
    println!("  Control:     {control:.2}");
    println!("  Gain:        {gain:.4}x ({gain_db:.2} dB)");
    Ok(())
}

// ─── Control sweep ──────────────────────────────────────────────────────────

fn cmd_sweep(args: &[String]) -> CmdResult {
    let steps = (parse_flag(args, "--steps", 11.0) as usize).max(1);
    let freq = parse_flag(args, "--freq", 1000.0);
    let amplitude = parse_flag(args, "--amplitude", 0.1);
    let sr = parse_flag(args, "--sr", DEFAULT_SR);
    let csv_path = parse_flag_str(args, "--csv", "");

    let mut model = InferenceModel::new(load_model(args)?)?;

    let mut csv_lines = Vec::new();
    csv_lines.push("control,gain_db".to_string());

    println!("Control sweep ({freq:.0} Hz, amplitude {amplitude:.4})");
    println!("{:>10}  {:>10}", "Control", "Gain (dB)");
    println!("{:-<10}  {:-<10}", "", "");

    for i in 0..steps {
        let control = i as f64 / (steps - 1).max(1) as f64;
        let gain = measure_gain_at(&mut model, freq, amplitude, control as f32, sr);
        let gain_db = 20.0 * gain.max(1e-12).log10();

        println!("{control:>10.2}  {gain_db:>10.2}");
        csv_lines.push(format!("{control:.2},{gain_db:.2}"));
    }

    if !csv_path.is_empty() {
        std::fs::write(csv_path, csv_lines.join("\n") + "\n")?;
        println!("\nCSV written to {csv_path}");
    }
    Ok(())
}

// ─── Step trace ─────────────────────────────────────────────────────────────

fn cmd_trace(args: &[String]) -> CmdResult {
    let input = parse_flag_str(args, "--input", "");
    let control = parse_flag(args, "--control", 0.0) as f32;
    if input.is_empty() {
        return Err("trace needs --input X1,X2,...".into());
    }
    let samples = input
        .split(',')
        .map(|s| s.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut model = InferenceModel::new(load_model(args)?)?;
    let output = model.render(&samples, control);

    println!("{:>4}  {:>12}  {:>12}", "n", "input", "output");
    for (n, (x, y)) in samples.iter().zip(&output).enumerate() {
        println!("{n:>4}  {x:>12.6}  {y:>12.9}");
    }
    Ok(())
}

// ─── Real-time factor ───────────────────────────────────────────────────────

fn cmd_bench(args: &[String]) -> CmdResult {
    let seconds = parse_flag(args, "--seconds", 5.0);
    let sr = parse_flag(args, "--sr", DEFAULT_SR);
    let block = (parse_flag(args, "--block", 256.0) as usize).max(1);
    let channels = (parse_flag(args, "--channels", 2.0) as usize).max(1);

    let blob = load_model(args)?;
    let mut engine = StreamProcessor::new(blob)?;
    engine.prepare(&StreamConfig {
        sample_rate: sr as f32,
        max_block_size: block,
        channels,
    });

    let total = (seconds * sr) as usize;
    let blocks = total.div_ceil(block);
    let mut bufs = vec![vec![0.0f32; block]; channels];
    let mut phase = 0.0f64;
    let step = 2.0 * PI * 220.0 / sr;

    let start = Instant::now();
    for _ in 0..blocks {
        for s in 0..block {
            let x = (0.3 * phase.sin()) as f32;
            phase += step;
            for buf in bufs.iter_mut() {
                buf[s] = x;
            }
        }
        let mut slices: Vec<&mut [f32]> = bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
        engine.process_block(&mut slices);
    }
    let wall = start.elapsed().as_secs_f64();
    let audio = (blocks * block) as f64 / sr;
    let rtf = audio / wall.max(1e-9);

    println!("Real-time benchmark");
    println!("  Audio:       {audio:.2} s x {channels} ch @ {sr:.0} Hz, {block}-sample blocks");
    println!("  Wall time:   {:.3} s", wall);
    println!("  Real-time:   {rtf:.1}x");
    Ok(())
}

// ─── Markov generator ───────────────────────────────────────────────────────

/// Note-on keys from a standard MIDI file in time order. A note-on with
/// velocity 0 is a note-off and is skipped.
fn read_note_ons(path: &str, track: Option<usize>) -> Result<Vec<u8>, Box<dyn Error>> {
    let bytes = std::fs::read(path)?;
    let smf = Smf::parse(&bytes)?;

    let mut notes: Vec<(u64, usize, u8)> = Vec::new();
    for (t, events) in smf.tracks.iter().enumerate() {
        if track.is_some_and(|only| only != t) {
            continue;
        }
        let mut ticks = 0u64;
        for event in events {
            ticks += u64::from(event.delta.as_int());
            if let TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } = event.kind
            {
                if vel.as_int() > 0 {
                    notes.push((ticks, t, key.as_int()));
                }
            }
        }
    }
    // Stable: simultaneous notes keep track order.
    notes.sort_by_key(|&(ticks, t, _)| (ticks, t));
    Ok(notes.into_iter().map(|(_, _, key)| key).collect())
}

fn cmd_markov(args: &[String]) -> CmdResult {
    let midi_path = parse_flag_str(args, "--midi", "");
    if midi_path.is_empty() {
        return Err("markov needs --midi FILE".into());
    }
    let order = (parse_flag(args, "--order", 1.0) as usize).max(1);
    let length = parse_flag(args, "--length", 16.0) as usize;
    let seed = parse_flag(args, "--seed", 1.0) as u64;
    let track = parse_flag_str(args, "--track", "");
    let track = if track.is_empty() { None } else { Some(track.parse::<usize>()?) };

    let notes = read_note_ons(midi_path, track)?;
    let Some(&first) = notes.first() else {
        return Err(format!("no note-on events in {midi_path}").into());
    };
    tracing::info!(notes = notes.len(), order, seed, "training markov chain");

    let mut chain = MarkovChain::with_seed(order, seed);
    for note in &notes {
        chain.put_event(&note.to_string());
    }

    // Walk from the first note of the file; restart there on a dead end.
    let start = first.to_string();
    chain.reset_history();
    chain.prime(&start);
    let mut walk = Vec::with_capacity(length);
    for _ in 0..length {
        let token = chain.get_event(true);
        if token == REST_TOKEN {
            chain.reset_history();
            chain.prime(&start);
        }
        walk.push(token);
    }

    println!("Markov chain");
    println!("  Notes read:  {}", notes.len());
    println!("  Order:       {order}");
    println!("  States:      {}", chain.state_count());
    println!("walk: {}", walk.join(" "));
    Ok(())
}
