extern crate clap;
extern crate colored;
extern crate env_logger;
extern crate gnss_acq;
extern crate serde_json;

use std::fs::File;
use std::io::BufReader;

use clap::{Arg, App};
use colored::*;
use gnss_acq::DigSigProcErr;
use gnss_acq::config::InMemoryConfiguration;
use gnss_acq::gnss::acquisition::{Acquisition, AcquisitionConfig, ChipTableGenerator, DetectionResult, SignalVariant};
use gnss_acq::io::ChunkSource;
use gnss_acq::types::ItemType;

fn main() {
	env_logger::init();

	let matches = App::new("PCPS Acquisition")
		.version("0.1.0")
		.author("John Stanford (johnwstanford@gmail.com)")
		.about("Takes baseband IQ samples and searches every PRN of a chip table over code phase and Doppler")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename")
			.required(true).takes_value(true))
		.arg(Arg::with_name("codes")
			.short("c").long("codes")
			.help("JSON chip table mapping each PRN to its +1/-1 chips")
			.required(true).takes_value(true))
		.arg(Arg::with_name("config")
			.long("config")
			.help("JSON object of configuration properties")
			.takes_value(true))
		.arg(Arg::with_name("input_type")
			.short("t").long("type")
			.takes_value(true)
			.possible_values(&["gr_complex", "cshort", "cbyte"]))
		.arg(Arg::with_name("role")
			.long("role").takes_value(true).default_value("Acquisition"))
		.arg(Arg::with_name("signal")
			.long("signal").takes_value(true).default_value("1C"))
		.arg(Arg::with_name("chunk")
			.long("chunk").takes_value(true).default_value("4096")
			.help("Samples per buffer handed to each channel"))
		.arg(Arg::with_name("continuous")
			.long("continuous")
			.help("Restart every channel's search after it reports"))
		.arg(Arg::with_name("max_records")
			.short("m").long("max_records")
			.takes_value(true))
		.get_matches();

	if let Err(e) = run(&matches) {
		eprintln!("{}", format!("Error: {}", e).red());
		std::process::exit(1);
	}
}

fn run(matches:&clap::ArgMatches) -> Result<(), DigSigProcErr> {
	let fname:&str = matches.value_of("filename").unwrap();
	let codes:&str = matches.value_of("codes").unwrap();
	let role:&str = matches.value_of("role").unwrap();
	let signal:&str = matches.value_of("signal").unwrap();
	let continuous:bool = matches.is_present("continuous");
	let chunk_len:usize = matches.value_of("chunk").unwrap().parse()
		.map_err(|_| DigSigProcErr::Configuration("chunk must be a positive integer".into()))?;
	let opt_max_records:Option<usize> = match matches.value_of("max_records") {
		Some(s) => Some(s.parse().map_err(|_| DigSigProcErr::Configuration("max_records must be a positive integer".into()))?),
		None => None,
	};

	let props = match matches.value_of("config") {
		Some(path) => InMemoryConfiguration::from_json_file(path)?,
		None => InMemoryConfiguration::new(),
	};

	let mut base_config = AcquisitionConfig::from_configuration(&props, role, 0)?;
	if let Some(t) = matches.value_of("input_type") {
		base_config.item_type = t.parse::<ItemType>()?;
	}
	let generator = ChipTableGenerator::from_json_file(base_config.code_chip_rate_hz, codes)?;

	eprintln!("Decoding {} at {} [samples/sec] as {}, max_records={:?}", &fname, base_config.fs_hz, base_config.item_type, &opt_max_records);

	// One channel per PRN in the chip table
	let mut acqs:Vec<Acquisition> = vec![];
	for (channel, prn) in generator.prns().into_iter().enumerate() {
		let config = AcquisitionConfig { channel, ..base_config.clone() };
		let variant = SignalVariant::from_configuration(&props, role, channel, signal);
		let mut acq = Acquisition::new(config, Box::new(generator.clone()))?;
		acq.load_replica(prn, variant)?;
		acqs.push(acq);
	}
	if let Some(acq) = acqs.first() {
		eprintln!("{} channels, {} Doppler bins, threshold {:.3}", acqs.len(), acq.frequency_bins(), acq.threshold());
	}

	let file = File::open(fname).map_err(|e| DigSigProcErr::Configuration(format!("unable to open {}: {}", fname, e)))?;
	let mut all_records:Vec<DetectionResult> = vec![];

	'outer: for (chunk, idx) in ChunkSource::new(BufReader::new(file), base_config.item_type, chunk_len)? {

		for acq in &mut acqs {
			match acq.process(chunk.as_chunk()) {
				Ok(Some(result)) => {
					let result_str = format!("{:9.2} [Hz], {:6} [samples], {:8.3} / {:.3}, {} dwells",
						result.doppler_hz, result.code_phase, result.peak, result.threshold, result.dwells);
					let time:f64 = idx as f64 / base_config.fs_hz;
					if result.acquired {
						eprintln!("{:6.2} [sec], PRN {:02} {}", time, result.prn, result_str.green());
					} else {
						eprintln!("{:6.2} [sec], PRN {:02} {}", time, result.prn, result_str.yellow());
					}

					all_records.push(result);
					if continuous { acq.reset(); }
				},
				Ok(None) => {},
				Err(e) => eprintln!("Channel {}: Error, {}", acq.config().channel, e),
			}

			if let Some(max_records) = opt_max_records {
				if all_records.len() >= max_records { break 'outer; }
			}
		}

	}

	// Output data in JSON format
	match serde_json::to_string_pretty(&all_records) {
		Ok(s) => println!("{}", s),
		Err(e) => eprintln!("Unable to serialize results: {}", e),
	}

	Ok(())
}
