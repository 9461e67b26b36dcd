use std::{process::ExitCode, time::Instant};

use kanji_score::{KanjiScorer, PixelBuffer};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

const USAGE: &str = "usage: kanji-score <image-file|data-url> <kanji> [--debug]";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let debug = args.iter().any(|it| it == "--debug");
    let positional = args
        .iter()
        .filter(|it| !it.starts_with("--"))
        .collect::<Vec<_>>();
    let (Some(capture), Some(target)) = (positional.first(), positional.get(1)) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    let Some(target) = target.chars().next() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let ink = if capture.starts_with("data:") {
        PixelBuffer::from_data_url(capture)
    } else {
        image::open(capture.as_str())
            .map(|image| PixelBuffer::from_image(&image))
            .map_err(Into::into)
    };
    let ink = match ink {
        Ok(ink) => ink,
        Err(err) => {
            eprintln!("failed to load capture {capture}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let scorer = KanjiScorer::builder().build();
    let start = Instant::now();
    let aggregate = scorer.score_with_diagnostics(&ink, target);
    log::debug!("Scored in {:?}", start.elapsed());

    if debug {
        for font in &aggregate.results {
            let r = &font.result;
            println!(
                "{marker} {:<16} f1 {:.3}  precision {:.3}  recall {:.3}  ({} of {} ink, {} reference)",
                font.font,
                r.f1_score,
                r.precision,
                r.recall,
                r.matching_pixels,
                r.ink_pixels,
                r.reference_pixels,
                marker = if font.is_best { "*" } else { " " },
            );
        }
    }
    let verdict = if scorer.is_accepted(aggregate.best_score) {
        "pass"
    } else {
        "fail"
    };
    println!(
        "{target}: {:.1}% ({verdict})",
        aggregate.best_score * 100.0
    );
    ExitCode::SUCCESS
}
