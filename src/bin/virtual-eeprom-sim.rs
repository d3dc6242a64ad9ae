#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate virtual_eeprom;
use virtual_eeprom::*;

use std::io::{
	self,
	BufRead,
	Write,
};
use std::process::exit;
use std::thread;
use std::time::Duration;

use virtual_eeprom::sim::Controller;

// decimal, or hex with "0x" prefix
fn parse_number(s: &str) -> AResult<u32> {
	let r = if s.starts_with("0x") || s.starts_with("0X") {
		u32::from_str_radix(&s[2..], 16)
	} else {
		s.parse::<u32>()
	};
	r.map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid number {:?}: {}", s, e);
		e.context(msg).into()
	})
}

fn parse_u16(s: &str) -> AResult<u16> {
	let v = parse_number(s)?;
	ensure!(v <= 0xffff, "number {:?} too big (max 0xffff)", s);
	Ok(v as u16)
}

// always hex, "0x" prefix optional
fn parse_bytes<'a, I: Iterator<Item = &'a str>>(tokens: I) -> AResult<Vec<u8>> {
	let mut bytes = Vec::new();
	for t in tokens {
		let digits = if t.starts_with("0x") || t.starts_with("0X") { &t[2..] } else { t };
		let b = u8::from_str_radix(digits, 16).map_err(|e| {
			let e = failure::Error::from(e);
			let msg = format!("invalid byte {:?}: {}", t, e);
			failure::Error::from(e.context(msg))
		})?;
		bytes.push(b);
	}
	Ok(bytes)
}

fn get_param_or<T, F>(matches: &clap::ArgMatches, name: &str, default: T, parse: F) -> AResult<T>
where
	F: FnOnce(&str) -> AResult<T>,
{
	match matches.value_of(name) {
		None => Ok(default),
		Some(p) => parse(p).map_err(|e| {
			let msg = format!("invalid parameter {}: {}", name, e);
			e.context(msg).into()
		}),
	}
}

fn hex(data: &[u8]) -> String {
	let parts: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
	parts.join(" ")
}

fn hexdump<W: Write>(out: &mut W, data: &[u8]) -> io::Result<()> {
	for (i, b) in data.iter().enumerate() {
		if 0 == i % 16 {
			write!(out, "{:08x} ", i)?;
		} else if 0 == i % 8 {
			write!(out, " ")?;
		}
		write!(out, " {:02x}", b)?;
		if 15 == i % 16 {
			writeln!(out)?;
		}
	}
	if 0 != data.len() % 16 {
		writeln!(out)?;
	}
	writeln!(out, "{:08x}", data.len())
}

fn open_device(matches: &clap::ArgMatches) -> AResult<VirtualEeprom> {
	let defaults = DeviceConfig::default();
	let size = get_param_or(matches, "size", defaults.size, parse_u16)?;
	let address = get_param_or(matches, "address", defaults.address, |s| {
		let v = parse_number(s)?;
		ensure!(v <= 0xff, "bus address {:?} too big", s);
		Ok(v as u8)
	})?;
	let sda = get_param_or(matches, "sda", defaults.sda, |s| s.parse::<Pin>())?;
	let scl = get_param_or(matches, "scl", defaults.scl, |s| s.parse::<Pin>())?;

	let dev = VirtualEeprom::new(DeviceConfig::new(address, size, sda, scl))?;

	if let Some(path) = matches.value_of("image") {
		let image = read_image_file(path)?;
		dev.load(0, &image);
	}

	Ok(dev)
}

fn demo(dev: &VirtualEeprom, sub_m: &clap::ArgMatches) -> AResult<()> {
	let count = get_param_or(sub_m, "count", 3, parse_number)?;
	let interval = get_param_or(sub_m, "interval", 0, parse_number)?;

	dev.set_event_handler(|event, address, len| match event {
		EepromEvent::Read => println!("Read {:x} bytes from {:x}", len, address),
		EepromEvent::Write => println!("Wrote {:x} bytes to {:x}", len, address),
	});

	dev.write(0x0, &0xcafe_babeu32.to_be_bytes())?;

	let mut ctrl = Controller::attach(dev)?;
	println!("EEPROM has size {}", dev.size());
	println!("EEPROM data {}", hex(&ctrl.read(0x0, 4)?));

	for _ in 0..count {
		thread::sleep(Duration::from_millis(interval as u64));
		ctrl.write(0x0, &0xdead_beefu32.to_be_bytes())?;
		println!("EEPROM data {}", hex(&ctrl.read(0x0, 4)?));
	}

	Ok(())
}

// host toggles usb_attached, the client polls it over the bus
fn bridge(dev: &VirtualEeprom, sub_m: &clap::ArgMatches) -> AResult<()> {
	let count = get_param_or(sub_m, "count", 5, parse_number)?;
	let interval = get_param_or(sub_m, "interval", 0, parse_number)?;

	let host = ControlHost::new(dev);
	let mut client = ControlClient::new(Controller::attach(dev)?);

	let mut attached = false;
	for _ in 0..count {
		attached = !attached;
		host.set_usb_attached(attached)?;
		thread::sleep(Duration::from_millis(interval as u64));
		match client.get_usb_attached() {
			Ok(v) => println!("USB attached: {}", v as u8),
			Err(e) => println!("Error while fetching attached status: {}", e),
		}
	}

	Ok(())
}

fn session_line(dev: &VirtualEeprom, ctrl: &mut Controller, line: &str) -> AResult<()> {
	let mut tokens = line.split_whitespace();
	let cmd = match tokens.next() {
		None => return Ok(()),
		Some(c) if c.starts_with('#') => return Ok(()),
		Some(c) => c,
	};
	let mut arg = |what: &str| tokens.next().ok_or_else(|| format_err!("{}: missing {}", cmd, what));

	match cmd {
		"w" => {
			let data = parse_bytes(tokens)?;
			let accepted = ctrl.write_transaction(&data)?;
			println!("accepted {} of {} bytes", accepted, data.len());
		},
		"r" => {
			let len = parse_number(arg("length")?)?;
			println!("{}", hex(&ctrl.read_transaction(len as usize)?));
		},
		"seek" => {
			ctrl.seek(parse_u16(arg("address")?)?)?;
		},
		"put" => {
			let address = parse_u16(arg("address")?)?;
			ctrl.write(address, &parse_bytes(tokens)?)?;
		},
		"get" => {
			let address = parse_u16(arg("address")?)?;
			let len = parse_number(arg("length")?)?;
			println!("{}", hex(&ctrl.read(address, len as usize)?));
		},
		"store" => {
			let address = parse_u16(arg("address")?)?;
			dev.write(address, &parse_bytes(tokens)?)?;
		},
		"fetch" => {
			let address = parse_u16(arg("address")?)?;
			let len = parse_u16(arg("length")?)?;
			println!("{}", hex(&dev.read(address, len)?));
		},
		"fail" => {
			let kind = match arg("kind")? {
				"read" => PeripheralErrorKind::Read,
				"write" => PeripheralErrorKind::Write,
				"general" => PeripheralErrorKind::General,
				k => bail!("unknown peripheral error kind {:?}", k),
			};
			ctrl.bus_mut().fail_next(kind);
		},
		"cursor" => {
			println!("0x{:04x} ({:?})", dev.cursor(), dev.state());
		},
		"dump" => {
			hexdump(&mut io::stdout(), &dev.snapshot())?;
		},
		_ => bail!("unknown command {:?}", cmd),
	}

	Ok(())
}

fn session(dev: &VirtualEeprom) -> AResult<()> {
	dev.set_event_handler(|event, address, len| {
		println!("event: {} {} bytes @ 0x{:04x}", event, len, address);
	});

	let mut ctrl = Controller::attach(dev)?;
	let mut failed = 0usize;

	let stdin = io::stdin();
	for (n, line) in stdin.lock().lines().enumerate() {
		let line = line?;
		if let Err(e) = session_line(dev, &mut ctrl, &line) {
			error!("line {}: {}", n + 1, e);
			failed += 1;
		}
	}

	ensure!(failed == 0, "{} command(s) failed", failed);
	Ok(())
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg size: -s --size +takes_value "EEPROM capacity in bytes (default 256)")
		(@arg address: -a --address +takes_value "7-bit bus address (default 0x50)")
		(@arg sda: --sda +takes_value "SDA pin (P<port>.<pin>, default P0.26)")
		(@arg scl: --scl +takes_value "SCL pin (P<port>.<pin>, default P0.27)")
		(@arg image: -i --image +takes_value "preload contents from binary file")
		(@subcommand demo =>
			(about: "store 0xcafebabe, then repeatedly overwrite and read it back over the bus")
			(@arg count: -c --count +takes_value "number of write/read rounds (default 3)")
			(@arg interval: --interval +takes_value "milliseconds between rounds (default 0)")
		)
		(@subcommand bridge =>
			(about: "toggle the usb_attached control register and poll it over the bus")
			(@arg count: -c --count +takes_value "number of toggles (default 5)")
			(@arg interval: --interval +takes_value "milliseconds between toggle and poll (default 0)")
		)
		(@subcommand session =>
			(about: "run bus transactions read from stdin, one per line: \
				w <bytes..>, r <len>, seek <addr>, put <addr> <bytes..>, get <addr> <len>, \
				store <addr> <bytes..>, fetch <addr> <len>, fail <read|write|general>, cursor, dump \
				(bytes are hex)")
		)
		(@subcommand dump =>
			(about: "hex dump of the contents")
		)
	).get_matches();

	let dev = open_device(&matches)?;

	match matches.subcommand() {
		("demo", Some(sub_m)) => {
			demo(&dev, sub_m)
		},
		("bridge", Some(sub_m)) => {
			bridge(&dev, sub_m)
		},
		("session", _) => {
			session(&dev)
		},
		("dump", _) => {
			hexdump(&mut io::stdout(), &dev.snapshot())?;
			Ok(())
		},
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
