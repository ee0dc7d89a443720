// Layerz CLI
// Standalone binary: pipe mode for interception chains, or grab an evdev
// device directly and mirror it through uinput.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use layerz_core::event::{REL_WHEEL, REL_X};
use layerz_core::layout::{ansi, ctrl, hook, k, lh, lt, mouse, Layer, Layout, XX, __};
use layerz_core::provider::{DeviceProvider, EventProvider, StdioProvider};
use layerz_core::Keyboard;

/// User-space keyboard remapper for Linux
#[derive(Parser, Debug)]
#[command(name = "layerz")]
#[command(version)]
#[command(about = "User-space keyboard remapper for Linux", long_about = None)]
struct Args {
    /// Evdev device to grab exclusively. Without it, layerz reads raw
    /// input_event records from stdin and writes them to stdout.
    device: Option<PathBuf>,
}

/// Log level from the LAYERZ_LOG environment variable. Logging always
/// goes to stderr; stdout is the event stream in pipe mode.
fn log_level() -> LevelFilter {
    match std::env::var("LAYERZ_LOG").as_deref() {
        Ok("trace") => LevelFilter::Trace,
        Ok("debug") => LevelFilter::Debug,
        Ok("warn") => LevelFilter::Warn,
        Ok("error") => LevelFilter::Error,
        Ok("off") => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Example hook: report that the cell fired. The same mechanism runs any
/// side effect a layout wants, e.g. spawning a device-reset helper.
fn diagnostics_hook() -> io::Result<()> {
    log::info!("diagnostics hook fired");
    Ok(())
}

/// The compiled-in layout.
///
/// Layer 0 is the plain board with CAPSLOCK doubling as ESC on tap and
/// the navigation layer on hold; SCROLLLOCK locks that layer in place.
/// Layer 1 puts F-keys on the number row, vim arrows on the home row,
/// pointer motion on WASD and clipboard chords on XCV.
fn layout() -> Layout {
    let mut base = Layer::passthrough();
    base.map("CAPSLOCK", lh("ESC", 1));
    base.map("SCROLLLOCK", lt(1));

    let mut nav = ansi(
        [
            __,
            k("F1"),
            k("F2"),
            k("F3"),
            k("F4"),
            k("F5"),
            k("F6"),
            k("F7"),
            k("F8"),
            k("F9"),
            k("F10"),
            k("F11"),
            k("F12"),
        ],
        [
            __,
            XX,
            mouse(REL_X, 0, -8),
            XX,
            mouse(REL_WHEEL, 1, 0),
            XX,
            XX,
            k("HOME"),
            k("END"),
            k("PAGEUP"),
            k("PAGEDOWN"),
            XX,
            XX,
            __,
        ],
        [
            __,
            mouse(REL_X, -8, 0),
            mouse(REL_X, 0, 8),
            mouse(REL_X, 8, 0),
            mouse(REL_WHEEL, -1, 0),
            XX,
            k("LEFT"),
            k("DOWN"),
            k("UP"),
            k("RIGHT"),
            XX,
            XX,
            __,
        ],
        [
            __,
            XX,
            ctrl("X"),
            ctrl("C"),
            ctrl("V"),
            XX,
            XX,
            XX,
            XX,
            XX,
            XX,
            __,
        ],
    );
    nav.map("PAUSE", hook(diagnostics_hook));

    Layout::new(vec![base, nav]).expect("compiled-in layout is invalid")
}

fn install_signal_flags() -> io::Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, interrupted.clone())?;
    }
    Ok(interrupted)
}

fn run<P: EventProvider>(provider: P, interrupted: &AtomicBool) -> Result<(), Box<dyn std::error::Error>> {
    let mut keyboard = Keyboard::new(layout(), provider);
    keyboard.init()?;
    keyboard.run()?;

    if interrupted.load(Ordering::SeqCst) {
        log::info!("interrupted, shutting down");
    } else {
        log::info!("end of stream, exiting");
    }
    Ok(())
}

fn main() {
    let _ = TermLogger::init(
        log_level(),
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let args = Args::parse();

    // A signal makes the blocking poll return EINTR, which the providers
    // surface as end-of-stream; teardown then ungrabs the device.
    let interrupted = match install_signal_flags() {
        Ok(flag) => flag,
        Err(err) => {
            log::error!("cannot install signal handlers: {}", err);
            std::process::exit(1);
        }
    };

    let result = match &args.device {
        Some(path) => match DeviceProvider::open(path) {
            Ok(provider) => run(provider, &interrupted),
            Err(err) => {
                log::error!("{}", err);
                std::process::exit(1);
            }
        },
        None => run(StdioProvider::new(), &interrupted),
    };

    if let Err(err) = result {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
