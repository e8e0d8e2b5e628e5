extern crate clap;
extern crate colored;
extern crate env_logger;
extern crate gnss_acq;
extern crate serde;
extern crate serde_json;
extern crate tokio;

use std::fs::File;
use std::io::BufReader;

use clap::{Arg, App};
use colored::*;
use gnss_acq::DigSigProcErr;
use gnss_acq::config::InMemoryConfiguration;
use gnss_acq::gnss::jamming::{ControlMessage, JammingConfig, JammingDetector};
use gnss_acq::io::ChunkSource;
use gnss_acq::types::ItemType;
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;

#[derive(Debug, Serialize, Deserialize)]
struct MonitorSummary {
	pub samples:u64,
	pub events:Vec<ControlMessage>,
}

#[tokio::main]
async fn main() {
	env_logger::init();

	let matches = App::new("Jamming Monitor")
		.version("0.1.0")
		.author("John Stanford (johnwstanford@gmail.com)")
		.about("Watches the spectrum of baseband IQ samples and reports sustained narrowband interference")
		.arg(Arg::with_name("filename")
			.short("f").long("filename")
			.help("Input filename")
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
			.long("role").takes_value(true).default_value("Jamming"))
		.arg(Arg::with_name("channel")
			.long("channel").takes_value(true).default_value("0"))
		.get_matches();

	if let Err(e) = run(&matches).await {
		eprintln!("{}", format!("Error: {}", e).red());
		std::process::exit(1);
	}
}

async fn run(matches:&clap::ArgMatches<'_>) -> Result<(), DigSigProcErr> {
	let fname:String = matches.value_of("filename").unwrap().to_string();
	let role:&str = matches.value_of("role").unwrap();
	let channel:usize = matches.value_of("channel").unwrap().parse()
		.map_err(|_| DigSigProcErr::Configuration("channel must be a non-negative integer".into()))?;

	let props = match matches.value_of("config") {
		Some(path) => InMemoryConfiguration::from_json_file(path)?,
		None => InMemoryConfiguration::new(),
	};
	let mut config = JammingConfig::from_configuration(&props, role, channel)?;
	if let Some(t) = matches.value_of("input_type") {
		config.item_type = t.parse::<ItemType>()?;
	}

	eprintln!("Monitoring {} at {} [samples/sec], {}-point spectra, threshold {}", &fname, config.fs_hz, config.chunk_size, config.threshold);

	let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();

	// Stands in for whatever acts on the messages; it finishes once the detector drops its sender
	let consumer = tokio::spawn(async move {
		let mut events:Vec<ControlMessage> = vec![];
		while let Some(msg) = rx.recv().await {
			eprintln!("{:8.3} [sec], channel {} {}", msg.time_s, msg.channel,
				format!("{:?} (metric {:.3}, bin {})", msg.reason, msg.metric, msg.peak_bin).red());
			events.push(msg);
		}
		events
	});

	let file = File::open(&fname).map_err(|e| DigSigProcErr::Configuration(format!("unable to open {}: {}", &fname, e)))?;
	let detector = JammingDetector::new(config.clone(), Some(tx))?;

	let samples:u64 = tokio::task::spawn_blocking(move || -> Result<u64, DigSigProcErr> {
		let mut detector = detector;
		for (chunk, _) in ChunkSource::new(BufReader::new(file), config.item_type, config.chunk_size)? {
			detector.process(chunk.as_chunk())?;
		}
		Ok(detector.sample_stamp())
	}).await.map_err(|e| DigSigProcErr::ResourceExhaustion(format!("detector task failed: {}", e)))??;

	let events = consumer.await.map_err(|e| DigSigProcErr::ResourceExhaustion(format!("consumer task failed: {}", e)))?;

	// Output data in JSON format
	match serde_json::to_string_pretty(&MonitorSummary{ samples, events }) {
		Ok(s) => println!("{}", s),
		Err(e) => eprintln!("Unable to serialize summary: {}", e),
	}

	Ok(())
}
