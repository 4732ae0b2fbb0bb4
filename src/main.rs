use std::{path::PathBuf, process};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

use audio_bitmap::{
    codec::{BackwardConverter, ConverterSettings, ForwardConverter},
    error::{Error, Result},
    math::{CompandingMethod, WindowShape},
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = App::new("audio_bitmap")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Turns audio into raw 16-bit RGB images you can edit, and back")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("encode")
                .about("wav -> one <name>_ch<N>.raw image per channel")
                .arg(
                    Arg::with_name("INPUT")
                        .help("wav file to encode (8/16/24/32-bit pcm or 32-bit float)")
                        .required(true),
                )
                .arg(
                    Arg::with_name("block-size")
                        .short("b")
                        .long("block-size")
                        .takes_value(true)
                        .default_value("2048")
                        .help("samples per analysis frame, a power of two"),
                )
                .arg(
                    Arg::with_name("companding")
                        .short("c")
                        .long("companding")
                        .takes_value(true)
                        .possible_values(&["sqrt", "mulaw", "uvlaw"])
                        .help("magnitude companding [default: uvlaw 768 0.125]"),
                )
                .arg(
                    Arg::with_name("params")
                        .short("p")
                        .long("params")
                        .takes_value(true)
                        .number_of_values(2)
                        .value_names(&["A", "B"])
                        .help("companding parameters"),
                )
                .arg(
                    Arg::with_name("window")
                        .short("w")
                        .long("window")
                        .takes_value(true)
                        .default_value("blackmanharris")
                        .help("rectangular, triangular, hann, hamming, blackman, blackmanharris"),
                )
                .arg(
                    Arg::with_name("workers")
                        .short("j")
                        .long("workers")
                        .takes_value(true)
                        .help("number of encode workers [default: 2 per logical processor]"),
                )
                .arg(
                    Arg::with_name("force")
                        .short("f")
                        .long("force")
                        .help("overwrite existing output files"),
                ),
        )
        .subcommand(
            SubCommand::with_name("decode")
                .about("<name>_ch<N>.raw images -> 32-bit float wav")
                .arg(
                    Arg::with_name("INPUT")
                        .help("base name, source wav name or any channel file")
                        .required(true),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .takes_value(true)
                        .help("output wav [default: <name>_modified.wav]"),
                )
                .arg(
                    Arg::with_name("force")
                        .short("f")
                        .long("force")
                        .help("overwrite an existing output file"),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        ("encode", Some(args)) => encode(args),
        ("decode", Some(args)) => decode(args),
        _ => Ok(()),
    };

    if let Err(err) = result {
        log::error!("{}", err);
        process::exit(1);
    }
}

fn parse<T: std::str::FromStr>(args: &ArgMatches, name: &str) -> Result<Option<T>> {
    args.value_of(name)
        .map(|value| {
            value.parse::<T>().map_err(|_| {
                Error::InvalidArgument(format!("bad value '{}' for --{}", value, name))
            })
        })
        .transpose()
}

fn encode(args: &ArgMatches) -> Result<()> {
    let mut settings = ConverterSettings::default().with_force_overwrite(args.is_present("force"));
    if let Some(block_size) = parse::<u32>(args, "block-size")? {
        settings = settings.with_block_size(block_size);
    }
    if let Some(method) = parse::<CompandingMethod>(args, "companding")? {
        settings = settings.with_companding(method);
    }
    if let Some(values) = args.values_of("params") {
        let params = values
            .map(|v| {
                v.parse::<f32>().map_err(|_| {
                    Error::InvalidArgument(format!("bad companding parameter '{}'", v))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        settings = settings.with_companding_params([params[0], params[1]]);
    }
    if let Some(window) = parse::<WindowShape>(args, "window")? {
        settings = settings.with_window(window);
    }

    let mut converter = match parse::<usize>(args, "workers")? {
        Some(count) => ForwardConverter::with_worker_count(settings, count)?,
        None => ForwardConverter::new(settings)?,
    };
    let input = PathBuf::from(args.value_of("INPUT").unwrap_or_default());
    let summary = converter.convert(&input)?;

    for output in &summary.outputs {
        println!("{}", output.display());
    }
    println!("{}", summary.layout);
    Ok(())
}

fn decode(args: &ArgMatches) -> Result<()> {
    let input = PathBuf::from(args.value_of("INPUT").unwrap_or_default());
    let converter = BackwardConverter::open(&input)?.with_force_overwrite(args.is_present("force"));
    let output = match args.value_of("output") {
        Some(path) => {
            let path = PathBuf::from(path);
            converter.convert_to(&path)?;
            path
        }
        None => converter.convert()?,
    };
    println!("{}", output.display());
    Ok(())
}
