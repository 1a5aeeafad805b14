#![warn(unused_extern_crates)]
use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyEventKind};
use image::RgbImage;
use image::imageops;
use mudra_core::dataset::{Dataset, DatasetPaths};
use mudra_core::overlay::{draw_hand, draw_recording_dot};
use mudra_core::pipeline::{HandDetector, HandPipeline};
use mudra_core::recognizer::Recognizer;
use mudra_core::smoothing::{extended_fingers, palm_facing};
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use ratatui::DefaultTerminal;
use session::{Action, Session};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{Level, error, info, span, trace, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use ui::{HandStatus, View};
use video::{PreviewWindow, create_input_stream};

mod session;
mod ui;
mod video;

const DATA_DIR: &str = "data/custom";
const SAMPLES_PER_SIGN: usize = 200;
const MIN_DETECTION_CONFIDENCE: f32 = 0.6;
const PALM_MODEL: &str = "models/palm_detection.onnx";
const HAND_MODEL: &str = "models/hand_landmark.onnx";
const LOG_FILE: &str = "collect.log";

#[derive(Parser, Debug)]
#[command(version, about = "Record hand landmark samples for custom signs", long_about = None)]
struct CmdArgs {
    /// Directory holding landmarks.npy, labels.npy and label_map.json
    #[arg(short, long, value_name = "DIR", default_value = DATA_DIR)]
    data_dir: PathBuf,

    /// Samples to record per sign before pausing
    #[arg(short, long, default_value_t = SAMPLES_PER_SIGN)]
    samples_per_sign: usize,

    /// Minimum palm detection score
    #[arg(long, default_value_t = MIN_DETECTION_CONFIDENCE)]
    min_confidence: f32,

    /// Palm detection ONNX model
    #[arg(long, value_name = "FILE", default_value = PALM_MODEL)]
    palm_model: PathBuf,

    /// Hand landmark ONNX model
    #[arg(long, value_name = "FILE", default_value = HAND_MODEL)]
    hand_model: PathBuf,

    /// Camera index. Uses the last camera found if unset
    #[arg(short, long)]
    camera: Option<u32>,

    /// Target frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Show annotated frames in an ffplay window
    #[arg(short, long)]
    preview: bool,

    /// Exported classifier to run live predictions with
    #[arg(short, long, value_name = "DIR")]
    model: Option<PathBuf>,
}

fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_env_filter(filter)
        .init();
    Ok(())
}

struct Collector<D: HandDetector> {
    session: Session,
    dataset: Dataset,
    paths: DatasetPaths,
    detector: D,
    recognizer: Option<Recognizer>,
    preview: Option<PreviewWindow>,
    hand: HandStatus,
    message: String,
}

fn main() -> Result<()> {
    let args = CmdArgs::parse();

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating {}", args.data_dir.display()))?;
    init_logging(&args.data_dir.join(LOG_FILE))?;

    let paths = DatasetPaths::in_dir(&args.data_dir);
    let dataset = Dataset::load_or_default(&paths)?;
    info!(
        "Loaded {} samples across {} signs from {}",
        dataset.len(),
        dataset.num_classes(),
        args.data_dir.display()
    );

    let detector = HandPipeline::new(
        &args.palm_model,
        &args.hand_model,
        num_cpus::get(),
        args.min_confidence,
    )?;
    let recognizer = match &args.model {
        Some(dir) => Some(Recognizer::load(dir)?),
        None => None,
    };

    let mut camera = match create_input_stream(args.camera, args.fps) {
        Ok(c) => c,
        Err(e) => {
            error!("Camera unavailable: {e:?}");
            return Err(e);
        }
    };

    let preview = if args.preview {
        let resolution = camera.resolution();
        Some(PreviewWindow::new(resolution.width(), resolution.height())?)
    } else {
        None
    };

    let mut collector = Collector {
        session: Session::new(args.samples_per_sign),
        dataset,
        paths,
        detector,
        recognizer,
        preview,
        hand: HandStatus::default(),
        message: String::new(),
    };

    let mut terminal = ratatui::init();
    let result = collector.run(&mut terminal, &mut camera);
    ratatui::restore();

    if let Err(e) = camera.stop_stream() {
        warn!("Failed to stop camera: {e:?}");
    }

    collector.dataset.save(&collector.paths)?;
    println!(
        "{} samples across {} signs in {}",
        collector.dataset.len(),
        collector.dataset.num_classes(),
        args.data_dir.display()
    );

    result
}

impl<D: HandDetector> Collector<D> {
    fn run(&mut self, terminal: &mut DefaultTerminal, camera: &mut Camera) -> Result<()> {
        loop {
            let span = span!(Level::DEBUG, "frame_loop_iter");
            let _guard = span.enter();

            while event::poll(Duration::ZERO)? {
                let key = match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => key,
                    _ => continue,
                };
                let action = self.session.handle_key(key.code);
                if !self.handle_action(action)? {
                    return Ok(());
                }
            }

            let get_frame_span = span!(Level::DEBUG, "get_frame");
            let get_frame_guard = get_frame_span.enter();
            let frame = camera.frame().context("Failed to pull frame from webcam")?;
            let mut img: RgbImage = frame.decode_image::<RgbFormat>()?;
            imageops::flip_horizontal_in_place(&mut img);
            drop(get_frame_guard);

            self.process_frame(&mut img);

            terminal.draw(|f| {
                ui::draw(
                    f,
                    &View {
                        session: &self.session,
                        dataset: &self.dataset,
                        hand: &self.hand,
                        message: &self.message,
                    },
                )
            })?;
        }
    }

    /// Returns false once the user asked to quit.
    fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::None => {}
            Action::StartSign(name) => {
                let idx = self.dataset.label_map_mut().get_or_insert(&name);
                info!("Collecting sign '{name}' as class {idx}");
                self.message = format!("Ready to record '{name}'. Press SPACE to start");
                if let Some(r) = self.recognizer.as_mut() {
                    r.reset();
                }
            }
            Action::Save => {
                self.dataset.save(&self.paths)?;
                self.message = format!("Saved {} samples", self.dataset.len());
            }
            Action::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn process_frame(&mut self, img: &mut RgbImage) {
        let span = span!(Level::DEBUG, "process_frame");
        let _guard = span.enter();

        let hand = match self.detector.detect(img) {
            Ok(hand) => hand,
            Err(e) => {
                error!("Failed to process frame: {e:?}");
                None
            }
        };

        self.hand.detected = hand.is_some();
        if let Some(h) = &hand {
            self.hand.fingers = extended_fingers(&h.landmarks);
            self.hand.palm = Some(palm_facing(&h.landmarks));
        } else {
            self.hand.fingers = [false; 5];
            self.hand.palm = None;
        }

        if self.session.is_recording() {
            if let (Some(h), Some(sign)) = (&hand, self.session.sign()) {
                self.dataset.push(h.features(), sign);
                trace!("Recorded sample {} for '{sign}'", self.dataset.len());
                if self.session.record() {
                    self.message = format!(
                        "Reached {} samples. Press N for the next sign",
                        self.session.samples_per_sign()
                    );
                    info!("Finished a run of {} samples", self.session.samples_per_sign());
                }
            }
        }

        if let Some(r) = self.recognizer.as_mut() {
            match r.recognize(hand.as_ref(), Instant::now()) {
                Ok(recognition) => {
                    self.hand.prediction = recognition.best;
                    if let Some(sign) = recognition.sign {
                        info!("Recognized {} ({:.2})", sign.label, sign.confidence);
                        self.hand.last_sign = Some(sign.label);
                    }
                }
                Err(e) => error!("Failed to classify hand: {e:?}"),
            }
        }

        if self.preview.is_some() {
            if let Some(h) = &hand {
                draw_hand(img, h);
            }
            if self.session.is_recording() {
                draw_recording_dot(img);
            }
            if let Some(preview) = self.preview.as_mut() {
                if let Err(e) = preview.write_frame(img) {
                    warn!("Preview closed: {e:?}");
                    self.preview = None;
                }
            }
        }
    }
}
