use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::warn;
use serde_json::Value;

use crate::DigSigProcErr;

/// Read-only access to named parameters.  Components read it once at setup and again
/// only when explicitly reconfigured.
pub trait ConfigurationProvider {

	fn property_str(&self, key:&str) -> Option<String>;

	fn has_property(&self, key:&str) -> bool { self.property_str(key).is_some() }

	fn property<T: FromStr>(&self, key:&str, default:T) -> T where Self: Sized {
		property_or(self, key, default)
	}

}

/// Same as `ConfigurationProvider::property`, usable through a trait object
pub fn property_or<T: FromStr, P: ConfigurationProvider + ?Sized>(provider:&P, key:&str, default:T) -> T {
	match provider.property_str(key) {
		Some(s) => match s.trim().parse::<T>() {
			Ok(t) => t,
			Err(_) => {
				warn!("Unable to parse {}={:?}, using the default value", key, s);
				default
			}
		},
		None => default,
	}
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryConfiguration {
	properties: HashMap<String, String>,
}

impl InMemoryConfiguration {

	pub fn new() -> Self { Self::default() }

	pub fn set_property(&mut self, key:&str, value:&str) {
		self.properties.insert(key.to_string(), value.to_string());
	}

	pub fn len(&self) -> usize { self.properties.len() }

	pub fn is_empty(&self) -> bool { self.properties.is_empty() }

	/// Loads a flat JSON object; numbers and booleans are kept in their textual form
	pub fn from_json_str(s:&str) -> Result<Self, DigSigProcErr> {
		let value:Value = serde_json::from_str(s).map_err(|e| DigSigProcErr::Configuration(format!("invalid JSON: {}", e)))?;
		let obj = match value {
			Value::Object(obj) => obj,
			_ => return Err(DigSigProcErr::Configuration("expected a JSON object of properties".into())),
		};

		let mut ans = Self::new();
		for (key, val) in obj.into_iter() {
			let text:String = match val {
				Value::String(s) => s,
				Value::Number(n) => n.to_string(),
				Value::Bool(b)   => b.to_string(),
				other => return Err(DigSigProcErr::Configuration(format!("property {} has unsupported value {}", key, other))),
			};
			ans.properties.insert(key, text);
		}
		Ok(ans)
	}

	pub fn from_json_file<P: AsRef<Path>>(path:P) -> Result<Self, DigSigProcErr> {
		let path_ref = path.as_ref();
		let contents = fs::read_to_string(path_ref)
			.map_err(|e| DigSigProcErr::Configuration(format!("unable to read {}: {}", path_ref.display(), e)))?;
		Self::from_json_str(&contents)
	}

}

impl ConfigurationProvider for InMemoryConfiguration {

	fn property_str(&self, key:&str) -> Option<String> { self.properties.get(key).cloned() }

}
