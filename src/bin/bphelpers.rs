#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate bphelpers;
use bphelpers::*;

use std::process::exit;

use bphelpers::planner::{
	DeviceProfile,
	Plan,
};
use bphelpers::transport::{
	sim,
	Recorder,
};

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	param.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid paramater {}: {}", name, e);
		e.context(msg).into()
	})
}

fn get_str<'a>(matches: &'a clap::ArgMatches, name: &str) -> AResult<&'a str> {
	match matches.value_of(name) {
		Some(p) => Ok(p),
		None => bail!("missing parameter {}", name),
	}
}

// decimal or 0x-hex
fn get_number(matches: &clap::ArgMatches, name: &str) -> AResult<u64> {
	parse_number(get_str(matches, name)?).map_err(|e| {
		let msg = format!("invalid paramater {}: {}", name, e);
		e.context(msg).into()
	})
}

fn get_address(matches: &clap::ArgMatches) -> AResult<u32> {
	let address = get_number(matches, "ADDRESS")?;
	ensure!(address <= u32::max_value() as u64, "address 0x{:x} too large", address);
	Ok(address as u32)
}

fn get_profile(matches: &clap::ArgMatches) -> AResult<DeviceProfile> {
	let mut profile = DeviceProfile::lookup(get_str(matches, "DEVICE")?)?;
	if matches.is_present("page-size") {
		profile = profile.with_page_size(get_number(matches, "page-size")? as usize)?;
	}
	if matches.is_present("capacity") {
		profile = profile.with_capacity(get_number(matches, "capacity")? as usize)?;
	}
	if matches.is_present("max-transaction") {
		profile = profile.with_max_transaction_size(get_number(matches, "max-transaction")? as usize)?;
	}
	Ok(profile)
}

fn list_profiles() -> AResult<()> {
	for (name, profile) in planner::PROFILES.iter() {
		println!("{:<10} {}", name, profile);
	}
	Ok(())
}

fn print_plan(plan: Plan) {
	let mut count = 0;
	for sub in plan {
		println!("{:?} @0x{:06x}: {} bytes", sub.direction, sub.address, sub.len);
		count += 1;
	}
	info!("{} sub-transactions", count);
}

fn plan_write(sub_m: &clap::ArgMatches) -> AResult<()> {
	let profile = get_profile(sub_m)?;
	let address = get_address(sub_m)?;
	let length = get_number(sub_m, "LENGTH")? as usize;
	print_plan(planner::plan_write_len(&profile, address, length)?);
	Ok(())
}

fn plan_read(sub_m: &clap::ArgMatches) -> AResult<()> {
	let profile = get_profile(sub_m)?;
	let address = get_address(sub_m)?;
	let length = get_number(sub_m, "LENGTH")? as usize;
	print_plan(planner::plan_read(&profile, address, length)?);
	Ok(())
}

fn verify(image: &[u8], read_back: &[u8]) -> AResult<()> {
	for (offset, (expected, actual)) in image.iter().zip(read_back).enumerate() {
		ensure!(expected == actual,
			"Verify failed at offset {:x}: expected {:02x}, read {:02x}", offset, expected, actual
		);
	}
	ensure!(image.len() == read_back.len(), "Read back {} bytes, expected {}", read_back.len(), image.len());
	Ok(())
}

fn dry_run_eeprom(sub_m: &clap::ArgMatches) -> AResult<()> {
	let profile = get_profile(sub_m)?;
	let address = get_address(sub_m)?;
	let device_address = match sub_m.value_of("i2c-address") {
		Some(_) => {
			let a = get_number(sub_m, "i2c-address")?;
			ensure!(a <= 0x7f, "I2C address 0x{:x} is not a 7-bit address", a);
			a as u8
		},
		None => at24c::DEFAULT_DEVICE_ADDRESS,
	};
	let image = std::fs::read(get_str(sub_m, "FILE")?)?;

	let device = Recorder::new(sim::SimEeprom::new(&profile, device_address));
	let mut eeprom = at24c::Eeprom::open(device, profile, device_address)?;
	eeprom.store(address, &image)?;
	let read_back = eeprom.load(address, image.len())?;
	verify(&image, &read_back)?;

	info!("stored and verified {} bytes in {} exchanges", image.len(), eeprom.transport().exchanges().len());
	Ok(())
}

fn dry_run_flash(sub_m: &clap::ArgMatches) -> AResult<()> {
	let profile = get_profile(sub_m)?;
	let address = get_address(sub_m)?;
	let interlock: w25q::Interlock = match sub_m.value_of("interlock") {
		Some(_) => get_param(sub_m, "interlock")?,
		None => w25q::Interlock::default(),
	};
	let image = std::fs::read(get_str(sub_m, "FILE")?)?;

	let device = Recorder::new(sim::SimFlash::new(&profile));
	let mut flash = w25q::Flash::open(device, profile)?.with_interlock(interlock);
	info!("{}", flash.info()?);
	info!("status: {:?}", flash.status_registers()?);
	info!("{} page programs needed", flash.calculate_pages(address, &image)?);
	flash.store(address, &image)?;
	let read_back = flash.read(address, image.len())?;
	verify(&image, &read_back)?;

	info!("stored and verified {} bytes in {} exchanges", image.len(), flash.transport().exchanges().len());
	Ok(())
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@subcommand profiles =>
			(about: "list known device profiles")
		)
		(@subcommand plan_write =>
			(about: "show the page writes for a write of LENGTH bytes")
			(@arg ("page-size"): --("page-size") +takes_value "override page size")
			(@arg capacity: --capacity +takes_value "override capacity")
			(@arg ("max-transaction"): --("max-transaction") +takes_value "override maximum transaction size")
			(@arg DEVICE: +required "device profile (see `profiles`)")
			(@arg ADDRESS: +required "start address")
			(@arg LENGTH: +required "number of bytes")
		)
		(@subcommand plan_read =>
			(about: "show the reads for a read of LENGTH bytes")
			(@arg ("page-size"): --("page-size") +takes_value "override page size")
			(@arg capacity: --capacity +takes_value "override capacity")
			(@arg ("max-transaction"): --("max-transaction") +takes_value "override maximum transaction size")
			(@arg DEVICE: +required "device profile (see `profiles`)")
			(@arg ADDRESS: +required "start address")
			(@arg LENGTH: +required "number of bytes")
		)
		(@subcommand dry_run =>
			(about: "store a file into a simulated device and verify it")
			(@setting SubcommandRequiredElseHelp)
			(@subcommand eeprom =>
				(about: "I2C EEPROM")
				(@arg ("i2c-address"): --("i2c-address") +takes_value "7-bit I2C address (default 0x50)")
				(@arg DEVICE: +required "device profile (see `profiles`)")
				(@arg ADDRESS: +required "start address")
				(@arg FILE: +required "image to store")
			)
			(@subcommand flash =>
				(about: "SPI NOR flash")
				(@arg interlock: --interlock +takes_value "status check before each page program ('every', default) or once per write ('once')")
				(@arg DEVICE: +required "device profile (see `profiles`)")
				(@arg ADDRESS: +required "start address")
				(@arg FILE: +required "image to store")
			)
		)
	).get_matches();

	match matches.subcommand() {
		("profiles", _) => {
			list_profiles()
		}
		("plan_write", Some(sub_m)) => {
			plan_write(sub_m)
		}
		("plan_read", Some(sub_m)) => {
			plan_read(sub_m)
		}
		("dry_run", Some(sub_m)) => match sub_m.subcommand() {
			("eeprom", Some(sub_sub_m)) => {
				dry_run_eeprom(sub_sub_m)
			},
			("flash", Some(sub_sub_m)) => {
				dry_run_flash(sub_sub_m)
			},
			("", _) => bail!("no subcommand"),
			(cmd, _) => bail!("not implemented subcommand for 'dry_run' {:?}", cmd),
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
