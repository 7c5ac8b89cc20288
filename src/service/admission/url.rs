//! Model-store URL grammar:
//! `[<name>[:<ver>[:<engine>[:<device-spec>]]]=]<url>`.

use serving_core::{err, Result};

/// The parsed prefix plus the raw URL tail. Any field left unspecified by
/// the prefix is `None`; the caller fills in defaults (a generated name,
/// the configured default engine, an empty device spec).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedModelUrl {
	pub name: Option<String>,
	pub version: Option<String>,
	pub engine: Option<String>,
	pub device_spec: Option<String>,
	pub url: String,
}

/// Splits on the first unescaped `=`. No `=` means no prefix at all: the
/// whole string is the URL and every other field is `None`.
pub fn parse_model_url(raw: &str) -> Result<ParsedModelUrl> {
	let Some(eq) = raw.find('=') else {
		return Ok(ParsedModelUrl { url: raw.to_string(), ..Default::default() });
	};

	let (prefix, rest) = raw.split_at(eq);
	let url = rest[1..].to_string();
	if url.is_empty() {
		return Err(err!(BadSpec("model-store entry {raw:?} has an empty URL")));
	}

	let mut parts = prefix.splitn(4, ':');
	let name = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
	let version = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
	let engine = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
	let device_spec = parts.next().filter(|s| !s.is_empty()).map(str::to_string);

	Ok(ParsedModelUrl { name, version, engine, device_spec, url })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bare_url_has_no_prefix() {
		let p = parse_model_url("https://store/models/m1.bin").unwrap();
		assert_eq!(p.name, None);
		assert_eq!(p.url, "https://store/models/m1.bin");
	}

	#[test]
	fn full_prefix_splits_every_field() {
		let p = parse_model_url("m1:v2:native:{2}=https://store/m1.bin").unwrap();
		assert_eq!(p.name.as_deref(), Some("m1"));
		assert_eq!(p.version.as_deref(), Some("v2"));
		assert_eq!(p.engine.as_deref(), Some("native"));
		assert_eq!(p.device_spec.as_deref(), Some("{2}"));
		assert_eq!(p.url, "https://store/m1.bin");
	}

	#[test]
	fn partial_prefix_leaves_trailing_fields_none() {
		let p = parse_model_url("m1=https://store/m1.bin").unwrap();
		assert_eq!(p.name.as_deref(), Some("m1"));
		assert_eq!(p.version, None);
		assert_eq!(p.engine, None);
	}

	#[test]
	fn empty_url_is_rejected() {
		assert!(parse_model_url("m1=").is_err());
	}
}
