//! Mathfall entry point
//!
//! Native builds run a headless demo: one auto-played session on a simulated
//! clock, printing the outcome. Usage:
//!
//! ```text
//! mathfall [topic] [seed] [accuracy 0..1] [--resume] [--pace=relaxed|standard|intense]
//! ```

#[cfg(not(target_arch = "wasm32"))]
mod demo {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    use mathfall::consts::*;
    use mathfall::scoring::OfflineBackend;
    use mathfall::sim::{GameEvent, GamePhase, TickInput};
    use mathfall::{
        LoadKind, PacePreset, ProblemSupplyService, Session, SessionConfig, Settings, StartOutcome, SupplyConfig,
    };

    /// Player reaction time between answers
    const THINK_MS: u64 = 700;
    /// Give up after this much simulated time
    const MAX_RUN_MS: u64 = 30 * 60 * 1_000;

    struct Args {
        topic: String,
        seed: u64,
        accuracy: f64,
        resume: bool,
        pace: Option<PacePreset>,
    }

    fn parse_args() -> Args {
        let mut args = Args {
            topic: "multiplication".to_string(),
            seed: mathfall::platform::now_ms(),
            accuracy: 0.9,
            resume: false,
            pace: None,
        };
        let mut positional = 0;
        for arg in std::env::args().skip(1) {
            if arg == "--resume" {
                args.resume = true;
                continue;
            }
            if let Some(pace) = arg.strip_prefix("--pace=") {
                args.pace = PacePreset::from_str(pace);
                if args.pace.is_none() {
                    log::warn!("Unknown pace {:?}", pace);
                }
                continue;
            }
            match positional {
                0 => args.topic = arg,
                1 => match arg.parse() {
                    Ok(seed) => args.seed = seed,
                    Err(_) => log::warn!("Ignoring bad seed {:?}", arg),
                },
                2 => match arg.parse::<f64>() {
                    Ok(accuracy) => args.accuracy = accuracy.clamp(0.0, 1.0),
                    Err(_) => log::warn!("Ignoring bad accuracy {:?}", arg),
                },
                _ => log::warn!("Ignoring extra argument {:?}", arg),
            }
            positional += 1;
        }
        args
    }

    pub fn run() {
        mathfall::platform::init_logging();
        let args = parse_args();
        log::info!(
            "Mathfall demo: topic={:?} seed={} accuracy={:.2}",
            args.topic,
            args.seed,
            args.accuracy
        );

        let storage = mathfall::platform::default_storage();
        let mut settings = Settings::load(storage.as_ref());
        if let Some(pace) = args.pace {
            settings.pace = pace;
        }
        let supply = Rc::new(RefCell::new(ProblemSupplyService::new(SupplyConfig {
            seed: args.seed,
            ..SupplyConfig::default()
        })));
        let config = SessionConfig {
            game_id: "demo".to_string(),
            student_id: "local".to_string(),
            topic: args.topic.clone(),
            start_level: 1,
            seed: args.seed,
            settings,
        };
        let mut session = Session::new(config, supply, storage, Box::new(OfflineBackend));
        let mut player = Pcg32::seed_from_u64(args.seed ^ 0xa11ce);

        let load = if args.resume {
            LoadKind::Reload
        } else {
            LoadKind::Navigation
        };
        let start = mathfall::platform::now_ms();
        match session.start(start, load) {
            StartOutcome::Restored { level, score } => {
                println!("Progress restored: level {} score {}", level, score)
            }
            StartOutcome::Fresh { level, unlocked_level } => {
                println!("New run at level {} (unlocked up to {})", level, unlocked_level)
            }
        }

        let mut now = start;
        let mut next_answer = start;
        let (mut correct, mut wrong, mut missed) = (0u32, 0u32, 0u32);

        while !session.state().phase.is_terminal() && now - start < MAX_RUN_MS {
            now += TICK_MS;
            let mut input = TickInput::default();
            let phase = session.state().phase;

            if phase == GamePhase::LevelComplete {
                input.continue_level = true;
            } else if phase == GamePhase::Running && now >= next_answer {
                let target = session.state().items.iter().find(|item| item.is_open());
                if let Some(item) = target {
                    let answer = if player.random_bool(args.accuracy) {
                        item.problem.answer.clone()
                    } else {
                        format!("{}?", item.problem.answer)
                    };
                    input.answer = Some(answer);
                    next_answer = now + THINK_MS;
                }
            }

            for event in session.tick(now, &input) {
                match event {
                    GameEvent::AnswerJudged { correct: true, .. } => correct += 1,
                    GameEvent::AnswerJudged { correct: false, .. } => wrong += 1,
                    GameEvent::ItemMissed { .. } => missed += 1,
                    GameEvent::LevelCompleted { level, .. } => {
                        println!("Level {} complete at {:.1}s", level, (now - start) as f64 / 1000.0)
                    }
                    GameEvent::WatchdogFired { forced_level_up } => {
                        println!("Watchdog fired (forced level up: {})", forced_level_up)
                    }
                    _ => {}
                }
            }
        }

        session.exit(now);
        let state = session.state();
        println!();
        println!("Outcome:   {:?}", state.phase);
        println!("Score:     {}", state.run.score);
        println!("Level:     {}", state.run.current_level);
        println!("Lives:     {}", state.run.lives);
        println!("Answers:   {} correct, {} wrong, {} missed", correct, wrong, missed);
        println!("Play time: {}s", state.run.time_spent_secs());
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    demo::run();
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn wasm_main() {
    mathfall::platform::init_logging();
    log::info!("Mathfall engine loaded");
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // WASM entry point is wasm_main, this is just to satisfy the compiler
}
