// Copyright 2026 The i2c-eeprom Authors
// Licensed under the Apache-2.0 and MIT licenses.

use std::{fs::File, io::{Read, Write}, path::{Path, PathBuf}, time::{Duration, Instant}};
use clap::{Command, Arg, ArgAction, ArgMatches, crate_description, crate_version, value_parser};
use clap_num::maybe_hex;
use anyhow::bail;
use indicatif::{ProgressBar, ProgressStyle};

use i2c_eeprom::{Eeprom, EmulatedEeprom, Error, Region, SizeProbe, UpdatePolicy};

const DATA_PROGRESS_TPL: &str =
    " {msg:10} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}; {eta})";
const DATA_PROGRESS_CHARS: &str = "=> ";

#[allow(clippy::cognitive_complexity)]
fn main() -> anyhow::Result<()> {
    let matches = Command::new("i2c-eeprom")
        .version(crate_version!())
        .about(crate_description!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .propagate_version(true)
        .infer_subcommands(true)
        .arg(Arg::new("quiet")
             .help("Suppress informative output and raise log level to errors only")
             .long("quiet")
             .short('q')
             .action(ArgAction::SetTrue)
             .global(true))
        .arg(Arg::new("verbose")
             .help("Increase log level, specify once for info, twice for debug, three times for trace")
             .long("verbose")
             .short('v')
             .action(ArgAction::Count)
             .conflicts_with("quiet")
             .global(true))
        .arg(Arg::new("image")
             .help("Image file holding the emulated EEPROM contents")
             .long("image")
             .short('i')
             .action(ArgAction::Set)
             .value_parser(value_parser!(PathBuf))
             .required(true)
             .global(true))
        .arg(Arg::new("capacity")
             .help("Device size in bytes, a power of two from 128 to 65536 \
                   (decimal, or hex with 0x prefix). Also the size of a new image.")
             .long("capacity")
             .short('c')
             .action(ArgAction::Set)
             .default_value("32768")
             .value_parser(maybe_hex::<u32>)
             .global(true))
        .arg(Arg::new("address")
             .help("Bus address of the device (decimal, or hex with 0x prefix)")
             .long("address")
             .short('a')
             .action(ArgAction::Set)
             .default_value("0x50")
             .value_parser(maybe_hex::<u8>)
             .global(true))
        .arg(Arg::new("id-page")
             .help("Device has an identification page, stored alongside the image")
             .long("id-page")
             .action(ArgAction::SetTrue)
             .global(true))
        .arg(Arg::new("region")
             .help("Memory region to access")
             .long("region")
             .short('r')
             .action(ArgAction::Set)
             .default_value("main")
             .value_parser(["main", "id"])
             .global(true))
        .arg(Arg::new("extra-delay")
             .help("Write cycle time in milliseconds to allow beyond the 5ms baseline")
             .long("extra-delay")
             .action(ArgAction::Set)
             .default_value("0")
             .value_parser(value_parser!(u8))
             .global(true))
        .arg(Arg::new("max-transfer")
             .help("Largest payload the emulated bus accepts in one transaction")
             .long("max-transfer")
             .action(ArgAction::Set)
             .default_value("30")
             .value_parser(value_parser!(usize))
             .global(true))
        .arg(Arg::new("write-cycle")
             .help("Emulated write cycle time in milliseconds")
             .long("write-cycle")
             .action(ArgAction::Set)
             .default_value("0")
             .value_parser(value_parser!(u64))
             .global(true))
        .subcommand(Command::new("info")
            .about("Show device configuration and status"))
        .subcommand(Command::new("read")
            .about("Read device contents to file, or print them")
            .arg(Arg::new("file")
                 .help("File to write contents to, prints a hex dump if not given"))
            .arg(Arg::new("offset")
                 .help("Start address (in bytes) of read (decimal, or hex with 0x prefix)")
                 .long("offset")
                 .action(ArgAction::Set)
                 .value_parser(maybe_hex::<u32>)
                 .default_value("0"))
            .arg(Arg::new("length")
                 .help("Length (in bytes) of read, defaults to the rest of the region \
                       (decimal, or hex with 0x prefix)")
                 .long("length")
                 .action(ArgAction::Set)
                 .value_parser(maybe_hex::<usize>)))
        .subcommand(Command::new("write")
            .about("Write binary file to device")
            .arg(Arg::new("file")
                 .help("File to write to device")
                 .required(true))
            .arg(Arg::new("offset")
                 .help("Start address (in bytes) to write to (decimal, or hex with 0x prefix)")
                 .long("offset")
                 .value_parser(maybe_hex::<u32>)
                 .default_value("0"))
            .arg(Arg::new("verify")
                 .help("Disable readback verification")
                 .short('n')
                 .long("no-verify")
                 .action(ArgAction::SetFalse)))
        .subcommand(Command::new("update")
            .about("Write only the bytes of a binary file which differ from the device")
            .arg(Arg::new("file")
                 .help("File to update device with")
                 .required(true))
            .arg(Arg::new("offset")
                 .help("Start address (in bytes) to update (decimal, or hex with 0x prefix)")
                 .long("offset")
                 .value_parser(maybe_hex::<u32>)
                 .default_value("0"))
            .arg(Arg::new("policy")
                 .help("Comparison used to find the bytes to write")
                 .long("policy")
                 .default_value("diff")
                 .value_parser(["diff", "bulk"])
                 .action(ArgAction::Set)))
        .subcommand(Command::new("fill")
            .about("Set a range of the device to a single value")
            .arg(Arg::new("value")
                 .help("Byte value to fill with (decimal, or hex with 0x prefix)")
                 .long("value")
                 .value_parser(maybe_hex::<u8>)
                 .default_value("0xFF"))
            .arg(Arg::new("offset")
                 .help("Start address (in bytes) of fill (decimal, or hex with 0x prefix)")
                 .long("offset")
                 .value_parser(maybe_hex::<u32>)
                 .default_value("0"))
            .arg(Arg::new("length")
                 .help("Length (in bytes) of fill, defaults to the rest of the region \
                       (decimal, or hex with 0x prefix)")
                 .long("length")
                 .action(ArgAction::Set)
                 .value_parser(maybe_hex::<usize>)))
        .subcommand(Command::new("verify")
            .about("Compare device contents with a binary file")
            .arg(Arg::new("file")
                 .help("File to compare with")
                 .required(true))
            .arg(Arg::new("offset")
                 .help("Start address (in bytes) to compare at (decimal, or hex with 0x prefix)")
                 .long("offset")
                 .value_parser(maybe_hex::<u32>)
                 .default_value("0")))
        .subcommand(Command::new("size")
            .about("Detect the device size")
            .arg(Arg::new("no-write")
                 .help("Only read from the device; needs varied data in its first 32 bytes")
                 .long("no-write")
                 .action(ArgAction::SetTrue)))
        .subcommand(Command::new("lock-id-page")
            .about("Permanently lock the identification page"))
        .get_matches();

    let t0 = Instant::now();
    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose");
    let env = if quiet {
        env_logger::Env::default().default_filter_or("error")
    } else if verbose == 0 {
        env_logger::Env::default().default_filter_or("warn")
    } else if verbose == 1 {
        env_logger::Env::default().default_filter_or("info")
    } else if verbose == 2 {
        env_logger::Env::default().default_filter_or("debug")
    } else {
        env_logger::Env::default().default_filter_or("trace")
    };
    env_logger::Builder::from_env(env).format_timestamp(None).init();

    let image = matches.get_one::<PathBuf>("image").unwrap();
    let id_image = image.with_extension("idpage");
    let capacity = *matches.get_one::<u32>("capacity").unwrap();
    let address = *matches.get_one::<u8>("address").unwrap();
    let has_id_page = matches.get_flag("id-page");
    let region = match matches.get_one::<String>("region").unwrap().as_str() {
        "main" => Region::Main,
        "id" => Region::IdPage,
        _ => panic!("Unhandled region"),
    };
    if region == Region::IdPage && !has_id_page {
        bail!("The identification page region needs --id-page.");
    }

    // Build the emulated device from the image files.
    let mut emu = load_emulator(image, &id_image, address, capacity, has_id_page)?
        .with_max_transfer(*matches.get_one("max-transfer").unwrap())
        .with_write_cycle(Duration::from_millis(*matches.get_one("write-cycle").unwrap()));

    let mut eeprom = Eeprom::new(&mut emu, address, capacity, has_id_page);
    eeprom.set_extra_write_delay_ms(*matches.get_one("extra-delay").unwrap());
    if !eeprom.begin(None)? {
        return Err(Error::NotConnected.into());
    }
    let region_size = match region {
        Region::Main => eeprom.device_size() as usize,
        Region::IdPage => eeprom.page_size(),
    };

    let mut modified = false;
    match matches.subcommand_name() {
        Some("info") => {
            println!("Bus address:    0x{:02X}", eeprom.address());
            println!("Device size:    {} bytes", eeprom.device_size());
            println!("Page size:      {} bytes", eeprom.page_size());
            println!("Addressing:     {:?}", eeprom.address_mode());
            println!("Image size:     {} bytes", eeprom.transport().capacity());
            match eeprom.id_page_address() {
                Some(id_address) => {
                    let status = eeprom.is_id_page_locked()?;
                    println!("ID page:        0x{:02X} (lock query status {})",
                             id_address, status);
                },
                None => println!("ID page:        none"),
            }
        },
        Some("read") => {
            let matches = matches.subcommand_matches("read").unwrap();
            let offset = *matches.get_one::<u32>("offset").unwrap();
            let length = length_or_rest(matches, offset, region_size)?;
            let mut data = vec![0u8; length];
            let n = if quiet {
                eeprom.read_block(region, offset, &mut data)?
            } else {
                let pb = data_progress(length, "Reading")?;
                let n = eeprom.read_block_cb(region, offset, &mut data,
                                             |n| pb.set_position(n as u64))?;
                pb.finish();
                n
            };
            if n != length {
                bail!("Device returned {} of {} requested bytes.", n, length);
            }
            match matches.get_one::<String>("file") {
                Some(path) => File::create(path)?.write_all(&data)?,
                None => print_hex_dump(offset, &data),
            }
        },
        Some("write") => {
            let matches = matches.subcommand_matches("write").unwrap();
            let data = read_file(matches.get_one::<String>("file").unwrap())?;
            let offset = *matches.get_one::<u32>("offset").unwrap();
            let verify = matches.get_flag("verify");
            if quiet {
                eeprom.write_block(region, offset, &data)?;
            } else {
                let pb = data_progress(data.len(), "Writing")?;
                eeprom.write_block_cb(region, offset, &data, |n| pb.set_position(n as u64))?;
                pb.finish();
            }
            modified = true;
            if verify {
                if !quiet { println!("Verifying...") };
                if !eeprom.verify_block(region, offset, &data)? {
                    bail!("Readback verification failed.");
                }
            }
        },
        Some("update") => {
            let matches = matches.subcommand_matches("update").unwrap();
            let data = read_file(matches.get_one::<String>("file").unwrap())?;
            let offset = *matches.get_one::<u32>("offset").unwrap();
            let policy = match matches.get_one::<String>("policy").unwrap().as_str() {
                "diff" => UpdatePolicy::DiffRuns,
                "bulk" => UpdatePolicy::BulkChunkCompare,
                _ => panic!("Unhandled update policy"),
            };
            eeprom.set_update_policy(policy);
            let written = eeprom.update_block(region, offset, &data)?;
            modified = written > 0;
            if !quiet { println!("Updated {} of {} bytes.", written, data.len()) };
        },
        Some("fill") => {
            let matches = matches.subcommand_matches("fill").unwrap();
            let value = *matches.get_one::<u8>("value").unwrap();
            let offset = *matches.get_one::<u32>("offset").unwrap();
            let length = length_or_rest(matches, offset, region_size)?;
            if !quiet { println!("Filling {} bytes with 0x{:02X}...", length, value) };
            eeprom.set_block(region, offset, value, length)?;
            modified = true;
        },
        Some("verify") => {
            let matches = matches.subcommand_matches("verify").unwrap();
            let data = read_file(matches.get_one::<String>("file").unwrap())?;
            let offset = *matches.get_one::<u32>("offset").unwrap();
            if eeprom.verify_block(region, offset, &data)? {
                if !quiet { println!("Contents match.") };
            } else {
                bail!("Contents differ.");
            }
        },
        Some("size") => {
            let matches = matches.subcommand_matches("size").unwrap();
            if matches.get_flag("no-write") {
                match eeprom.determine_size_no_write()? {
                    SizeProbe::Detected(size) => println!("Detected size: {} bytes", size),
                    SizeProbe::Undetermined => bail!("Could not determine size."),
                    SizeProbe::DefaultContent =>
                        bail!("First bytes are erased; write varied data there first."),
                    SizeProbe::UniformContent =>
                        bail!("First bytes are all equal; write varied data there first."),
                }
            } else {
                match eeprom.determine_size()? {
                    0 => bail!("Could not determine size."),
                    size => println!("Detected size: {} bytes", size),
                }
                modified = true;
            }
        },
        Some("lock-id-page") => {
            if !has_id_page {
                bail!("Locking the identification page needs --id-page.");
            }
            eeprom.lock_id_page()?;
            if !quiet { println!("Identification page locked.") };
        },
        _ => panic!("Unhandled command."),
    }

    if modified {
        log::info!("Saving image to {}", image.display());
        File::create(image)?.write_all(emu.memory())?;
        if let Some(page) = emu.id_page() {
            File::create(&id_image)?.write_all(page)?;
        }
    }

    let t1 = t0.elapsed();
    if !quiet {
        println!("Finished in {}.{:02}s", t1.as_secs(), t1.subsec_millis()/10);
    }

    Ok(())
}

/// Create the emulated device from `image`, or an erased one of `capacity`
/// bytes if the image does not exist yet.
fn load_emulator(image: &Path, id_image: &Path, address: u8, capacity: u32, id_page: bool)
    -> anyhow::Result<EmulatedEeprom>
{
    let mut emu = if image.exists() {
        let data = read_file(image)?;
        if !data.len().is_power_of_two() || data.len() < 128 || data.len() > 65536 {
            bail!("Image size {} is not a power of two from 128 to 65536 bytes.", data.len());
        }
        log::info!("Loaded {} byte image from {}", data.len(), image.display());
        EmulatedEeprom::new(address, data.len()).with_contents(&data)
    } else {
        log::info!("Creating new {} byte image", capacity);
        EmulatedEeprom::new(address, capacity as usize)
    };
    if id_page {
        emu = emu.with_id_page();
        if id_image.exists() {
            let data = read_file(id_image)?;
            emu = emu.with_id_page_contents(&data);
        }
    }
    Ok(emu)
}

fn read_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(data)
}

/// The `length` argument, or the rest of the region after `offset`.
fn length_or_rest(matches: &ArgMatches, offset: u32, region_size: usize)
    -> anyhow::Result<usize>
{
    if let Some(&length) = matches.get_one::<usize>("length") {
        Ok(length)
    } else if (offset as usize) < region_size {
        log::info!("No length specified, using rest of region");
        Ok(region_size - offset as usize)
    } else {
        bail!("Offset 0x{:04X} is beyond the region size {}.", offset, region_size);
    }
}

fn data_progress(length: usize, message: &'static str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(length as u64).with_style(ProgressStyle::default_bar()
        .template(DATA_PROGRESS_TPL)?.progress_chars(DATA_PROGRESS_CHARS));
    pb.set_message(message);
    Ok(pb)
}

fn print_hex_dump(offset: u32, data: &[u8]) {
    for (idx, line) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
        println!("0x{:04X}: {}", offset as usize + idx * 16, bytes.join(" "));
    }
}
