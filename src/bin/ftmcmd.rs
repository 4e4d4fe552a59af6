#![deny(clippy::unwrap_used)]

use chrono::Utc;
use clap::parser::ValueSource;
use clap::{arg, command, value_parser, ArgAction};
use std::io::ErrorKind;
use std::process::exit;
use std::{path::PathBuf, time::Duration};
use tracing_subscriber::EnvFilter;

use ftmctrl::config::FtmConfig;
use ftmctrl::proto::codec::Profile;
use ftmctrl::proto::conv::pretty_ts;
use ftmctrl::{Error, Ftm, Material, Result, DEFAULT_BAUDRATE, DEFAULT_TTY};

#[tokio::main]
async fn main() {
    let matches = command!() // requires `cargo` feature
        .arg(
            arg!(
                -p --device <PORT> "Serial port of the USB device or RS485 adapter"
            )
            .default_value(DEFAULT_TTY)
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(
            -d --debug ... "Turn debugging information on"
        ))
        .arg(
            arg!(
                -b --baudrate <BAUDRATE> "Baudrate"
            )
            .default_value(DEFAULT_BAUDRATE.to_string())
            .value_parser(value_parser!(u32)),
        )
        .arg(arg!(--bus "Device is on an RS485 line").action(ArgAction::SetTrue))
        .arg(
            arg!(
                -a --address <ADDRESS> "Bus address"
            )
            .default_value("1")
            .value_parser(value_parser!(u8).range(1..=247)),
        )
        .arg(
            arg!(
                -t --timeout <MS> "Response timeout in ms"
            )
            .default_value("500")
            .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            arg!(
                -c --config <FILE> "TOML configuration, command line options take precedence"
            )
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .subcommand(clap::Command::new("ident").about("Device identification"))
        .subcommand(
            clap::Command::new("gate")
                .about("Gate time in ms")
                .arg(arg!([ms] "Set gate time").value_parser(value_parser!(u32))),
        )
        .subcommand(
            clap::Command::new("averaging")
                .about("Averaging window, 0 disables averaging")
                .arg(arg!([window] "Set window").value_parser(value_parser!(u32))),
        )
        .subcommand(
            clap::Command::new("material")
                .about("Material density and Z-ratio")
                .arg(arg!([density] "Density in g/cm³").value_parser(value_parser!(f64)))
                .arg(
                    arg!([z_ratio] "Z-ratio")
                        .requires("density")
                        .value_parser(value_parser!(f64)),
                ),
        )
        .subcommand(
            clap::Command::new("scale")
                .about("Thickness scale factor")
                .arg(arg!([factor] "Set scale factor").value_parser(value_parser!(f64))),
        )
        .subcommand(
            clap::Command::new("target")
                .about("Target thickness")
                .arg(
                    arg!(--um <UM> "Set target in µm")
                        .conflicts_with("nm")
                        .value_parser(value_parser!(f64)),
                )
                .arg(arg!(--nm <NM> "Set target in nm").value_parser(value_parser!(f64))),
        )
        .subcommand(
            clap::Command::new("poll")
                .about("Run a measurement and print thickness and rate")
                .arg(
                    arg!(-n --count <N> "Number of polls, 0 polls forever")
                        .default_value("10")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    arg!(-i --interval <MS> "Poll interval in ms")
                        .default_value("1000")
                        .value_parser(value_parser!(u64).range(1..)),
                )
                .arg(arg!(--"keep-baseline" "Continue from the previous thickness baseline")),
        )
        .subcommand(
            clap::Command::new("rs485")
                .about("Secondary RS485 port of a USB device")
                .arg(arg!(--"set-baudrate" <BAUD> "Set baudrate").value_parser(value_parser!(u32)))
                .arg(
                    arg!(--"set-address" <ADDRESS> "Set address")
                        .value_parser(value_parser!(u8).range(1..=247)),
                ),
        )
        .subcommand(
            clap::Command::new("reconfig")
                .about("Baudrate and address of a bus device")
                .arg(arg!(--"set-baudrate" <BAUD> "Set baudrate").value_parser(value_parser!(u32)))
                .arg(
                    arg!(--"set-address" <ADDRESS> "Set address")
                        .value_parser(value_parser!(u8).range(1..=247)),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    let level = match matches.get_count("debug") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = handle_args(&matches).await {
        let port = matches
            .get_one::<PathBuf>("device")
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match e {
            Error::Serial(err) => {
                if err.kind() == tokio_serial::ErrorKind::NoDevice
                    || matches!(err.kind(), tokio_serial::ErrorKind::Io(ErrorKind::NotFound))
                {
                    eprintln!("{}: File not found", port);
                } else {
                    eprintln!("I/O Error: {} [device: {}]", err, port);
                }
            }
            Error::DeviceUnreachable { .. } | Error::TransportTimeout { .. } => {
                eprintln!("{} [device: {}]", e, port);
                eprintln!("Check port, baudrate and bus address.");
            }
            Error::StaleBinding { .. } => {
                eprintln!("{}", e);
                eprintln!("The device may now only answer at the new setting, reconnect with it.");
            }
            other => eprintln!("{}", other),
        }
        exit(-1);
    }
}

fn config_from_args(matches: &clap::ArgMatches) -> Result<FtmConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => FtmConfig::load(path)?,
        None => FtmConfig::default(),
    };
    let given = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);
    let no_file = matches.get_one::<PathBuf>("config").is_none();

    let c = &mut config.connection;
    if no_file || given("device") {
        if let Some(port) = matches.get_one::<PathBuf>("device") {
            c.port = port.to_string_lossy().into_owned();
        }
    }
    if no_file || given("baudrate") {
        c.baud_rate = *matches.get_one::<u32>("baudrate").unwrap_or(&DEFAULT_BAUDRATE);
    }
    if no_file || given("address") {
        c.address = *matches.get_one::<u8>("address").unwrap_or(&1);
    }
    if no_file || given("timeout") {
        c.timeout_ms = *matches.get_one::<u64>("timeout").unwrap_or(&500);
    }
    if matches.get_flag("bus") {
        c.profile = Profile::Bus;
    }
    config.validate()?;
    Ok(config)
}

async fn handle_args(matches: &clap::ArgMatches) -> Result<()> {
    let config = config_from_args(matches)?;
    let mut ftm = Ftm::from_config(&config)?;

    eprintln!(
        "Connected to: {} ({}{})\n",
        config.connection.port,
        config.connection.profile,
        match config.connection.profile {
            Profile::Bus => format!(", address {}", config.connection.address),
            Profile::Usb => String::new(),
        }
    );

    match matches.subcommand() {
        Some(("ident", _args)) => {
            let ident = ftm.ident().await?;
            println!("Vendor: {}", ident.vendor);
            println!("Product: {}", ident.product);
            println!("Version: {}", ident.version);
            println!("Serial: {}", ident.serial);
            println!("MCU frequency: {} Hz", ftm.mcu_frequency().await?);
        }
        Some(("gate", args)) => {
            if let Some(ms) = args.get_one::<u32>("ms") {
                ftm.set_gate_time(*ms).await?;
                println!("OK");
            } else {
                println!("Gate time: {} ms", ftm.gate_time().await?);
                if ftm.capabilities().prescaler {
                    println!("Prescaler count: {}", ftm.gate_prescaler_count().await?);
                }
            }
        }
        Some(("averaging", args)) => {
            if let Some(window) = args.get_one::<u32>("window") {
                let applied = ftm.set_averaging(*window).await?;
                println!("Averaging window set to {}", applied);
            } else {
                let window = ftm.averaging().await?;
                let progress = ftm.averaging_progress().await?;
                println!("Averaging: {}/{}", progress, window);
            }
        }
        Some(("material", args)) => {
            match (
                args.get_one::<f64>("density"),
                args.get_one::<f64>("z_ratio"),
            ) {
                (Some(density), Some(z_ratio)) => {
                    ftm.set_material(Material {
                        density: *density,
                        z_ratio: *z_ratio,
                    })
                    .await?;
                    println!("OK");
                }
                (Some(_), None) => {
                    eprintln!("Density and Z-ratio must be set together");
                }
                _ => println!("Material: {}", ftm.material().await?),
            }
        }
        Some(("scale", args)) => {
            if let Some(factor) = args.get_one::<f64>("factor") {
                ftm.set_scale(*factor).await?;
                println!("OK");
            } else {
                println!("Scale: {}", ftm.scale().await?);
            }
        }
        Some(("target", args)) => {
            if let Some(um) = args.get_one::<f64>("um") {
                println!("Target set to {} Å", ftm.set_target_um(*um).await?);
            } else if let Some(nm) = args.get_one::<f64>("nm") {
                println!("Target set to {} Å", ftm.set_target_nm(*nm).await?);
            } else {
                println!("Target: {} Å", ftm.target_thickness().await?);
            }
        }
        Some(("poll", args)) => {
            let count = *args.get_one::<u32>("count").unwrap_or(&10);
            let interval =
                Duration::from_millis(*args.get_one::<u64>("interval").unwrap_or(&1000));
            poll(&mut ftm, count, interval, !args.get_flag("keep-baseline")).await?;
        }
        Some(("rs485", args)) => {
            let Some(mut port) = ftm.rs485() else {
                return Err(Error::Unsupported(
                    "secondary RS485 port on bus device".to_string(),
                ));
            };
            if let Some(baud) = args.get_one::<u32>("set-baudrate") {
                port.set_baud_rate(*baud).await?;
            }
            if let Some(address) = args.get_one::<u8>("set-address") {
                port.set_address(*address).await?;
            }
            println!(
                "BR: {}, ADDR: {}",
                port.baud_rate().await?,
                port.address().await?
            );
        }
        Some(("reconfig", args)) => {
            let Some(mut link) = ftm.reconfigure() else {
                return Err(Error::Unsupported(
                    "link reconfiguration on USB device".to_string(),
                ));
            };
            if let Some(baud) = args.get_one::<u32>("set-baudrate") {
                link.set_baud_rate(*baud).await?;
            }
            if let Some(address) = args.get_one::<u8>("set-address") {
                link.set_address(*address).await?;
            }
            println!(
                "BR: {}, ADDR: {}",
                link.baud_rate().await?,
                link.address().await?
            );
        }
        _ => {}
    }

    Ok(())
}

async fn poll(ftm: &mut Ftm, count: u32, interval: Duration, reset: bool) -> Result<()> {
    ftm.start_measurement(reset).await?;
    let mut ticker = tokio::time::interval(interval);
    let mut polled = 0;
    let result = loop {
        if count != 0 && polled == count {
            break Ok(());
        }
        ticker.tick().await;
        polled += 1;
        if let Err(e) = poll_once(ftm).await {
            break Err(e);
        }
    };
    ftm.stop_measurement().await?;
    result
}

async fn poll_once(ftm: &mut Ftm) -> Result<()> {
    let window = ftm.averaging().await?;
    let progress = ftm.averaging_progress().await?;
    let frequency = ftm.frequency().await?;
    let counter = ftm.counter().await?;
    let rate = match ftm.rate() {
        Some(rate) => format!("{:.3} Å/s", rate),
        None => "-".to_string(),
    };
    println!(
        "{}  avg {}/{}  f={:.2} Hz  CNT={}  thickness={:.3} Å  rate={}",
        pretty_ts(&Utc::now()),
        progress,
        window,
        frequency,
        counter,
        ftm.thickness(),
        rate
    );
    Ok(())
}
