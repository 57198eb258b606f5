//! Line-oriented control surface
//!
//! Reads one command per line from stdin: `camera`, `screen`, `mic`,
//! `record`, `status`, `snapshot <camera|screen|canvas> <path>`, `quit`.

use open_screenrecorder::capture::{CaptureKind, NativeDevices};
use open_screenrecorder::encoder::FfmpegEncoderFactory;
use open_screenrecorder::sink::PathPicker;
use open_screenrecorder::{AppError, AppResult, Backends, ErrorResponse, RecorderConfig, SessionController};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    open_screenrecorder::init_logging();

    let config = RecorderConfig::from_env()?;
    tracing::info!("Starting Open ScreenRecorder v{}", env!("CARGO_PKG_VERSION"));

    let backends = Backends {
        devices: Arc::new(NativeDevices::new(config.capture.clone())),
        picker: Arc::new(PathPicker::from_config(&config.sink)),
        encoders: Arc::new(FfmpegEncoderFactory),
    };
    let controller = SessionController::new(config, backends)?;

    let status_printer = {
        let mut status = controller.subscribe();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                if let Ok(json) = serde_json::to_string(&current) {
                    println!("{}", json);
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        let result = match command {
            "quit" | "exit" => break,
            "camera" => toggle_source(&controller, CaptureKind::Camera).await,
            "screen" => toggle_source(&controller, CaptureKind::Screen).await,
            "mic" | "microphone" => toggle_source(&controller, CaptureKind::Microphone).await,
            "record" => match controller.toggle_recording().await {
                Ok(result) => result.map(|status| tracing::info!("Recording is now {:?}", status)),
                Err(e) => Err(AppError::Task(e.to_string())),
            },
            "status" => serde_json::to_string(&controller.status())
                .map(|json| println!("{}", json))
                .map_err(AppError::from),
            "snapshot" => snapshot(&controller, &args),
            other => {
                eprintln!("Unknown command: {}", other);
                Ok(())
            }
        };

        if let Err(e) = result {
            report(e);
        }
    }

    if let Err(e) = controller.shutdown().await {
        report(e);
    }
    status_printer.abort();
    Ok(())
}

async fn toggle_source(controller: &SessionController, kind: CaptureKind) -> AppResult<()> {
    match controller.toggle_source(kind).await {
        Ok(result) => result.map(|active| tracing::info!("{} active: {}", kind, active)),
        Err(e) => Err(AppError::Task(e.to_string())),
    }
}

fn snapshot(controller: &SessionController, args: &[&str]) -> AppResult<()> {
    let (target, path) = match args {
        [target, path] => (*target, Path::new(path)),
        _ => {
            eprintln!("Usage: snapshot <camera|screen|canvas> <path>");
            return Ok(());
        }
    };
    match target {
        "camera" => controller.snapshot(CaptureKind::Camera, path),
        "screen" => controller.snapshot(CaptureKind::Screen, path),
        "canvas" => controller.snapshot_canvas(path),
        other => {
            eprintln!("Unknown snapshot target: {}", other);
            Ok(())
        }
    }
}

fn report(error: AppError) {
    tracing::warn!("Command failed: {}", error);
    let response = ErrorResponse::from(error);
    match serde_json::to_string(&response) {
        Ok(json) => eprintln!("{}", json),
        Err(_) => eprintln!("{}: {}", response.code, response.message),
    }
}
