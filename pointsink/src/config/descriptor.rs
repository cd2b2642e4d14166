use std::collections::HashSet;

use url::Url;

use crate::{error::ConfigError, types::Category};

use super::{fingerprint, ConfigValue, SinkConfig, FILTERS, HOST, ID, TARGET};

/// Joins several descriptors given for one category
pub const DESCRIPTOR_SEPARATOR: &str = "||";

/// Turns one descriptor argument per category tag into deduplicated sink configs.
///
/// `category_tags[i]` pairs with `descriptor_args[i]`; each argument may hold several
/// `||`-joined descriptors. The same backend declared under several categories comes
/// back as one config carrying all of those categories. Configs without an `id` get
/// their fingerprint as id.
///
/// When every argument is empty the result is the single empty placeholder config,
/// meaning "no sink configured".
pub fn parse_descriptors(
    category_tags: &[impl AsRef<str>],
    descriptor_args: &[impl AsRef<str>],
) -> Result<Vec<SinkConfig>, ConfigError> {
    if category_tags.is_empty() || category_tags.len() != descriptor_args.len() {
        return Err(ConfigError::DescriptorCountMismatch {
            tags: category_tags.len(),
            args: descriptor_args.len(),
        });
    }

    let mut configs = vec![SinkConfig::default()];
    let mut placeholder = true;
    for (tag, arg) in category_tags.iter().zip(descriptor_args) {
        let arg = arg.as_ref().trim();
        if arg.is_empty() {
            continue;
        }
        if placeholder {
            configs.clear();
            placeholder = false;
        }
        for descriptor in arg.split(DESCRIPTOR_SEPARATOR) {
            let descriptor = descriptor.trim();
            if descriptor.is_empty() {
                continue;
            }
            let single = parse_single_descriptor(descriptor)?;
            merge(single, tag.as_ref(), &mut configs);
        }
    }

    for config in configs.iter_mut().filter(|c| !c.is_empty()) {
        if config.id().trim().is_empty() {
            let id = fingerprint(config).hash;
            config.insert(ID, id);
        }
    }
    Ok(configs)
}

/// Parses `scheme://host[:port][?key=value&...]`.
///
/// The scheme becomes `target` and the authority becomes `host`. Query keys are kept
/// verbatim with their first value, except `filters` which keeps every value.
pub fn parse_single_descriptor(descriptor: &str) -> Result<SinkConfig, ConfigError> {
    let url = Url::parse(descriptor).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => ConfigError::InvalidScheme {
            scheme: String::new(),
        },
        e => ConfigError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
            reason: e.to_string(),
        },
    })?;
    if url.scheme().is_empty() {
        return Err(ConfigError::InvalidScheme {
            scheme: String::new(),
        });
    }

    let mut config = SinkConfig::new().with(TARGET, url.scheme());
    if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
        let authority = match url.port().or_else(|| explicit_port(descriptor)) {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        config.insert(HOST, authority);
    }

    let mut filters: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for (key, value) in url.query_pairs() {
        if key == FILTERS {
            filters.push(value.into_owned());
            continue;
        }
        // the scheme always names the target; other keys keep their first value
        if key == TARGET || !seen.insert(key.clone()) {
            continue;
        }
        config.insert(key.into_owned(), value.into_owned());
    }
    if !filters.is_empty() {
        config.insert(FILTERS, ConfigValue::List(filters));
    }
    Ok(config)
}

/// The port written in the descriptor's authority. `Url` hides a scheme's default port,
/// so `http://h:80` would otherwise lose its `:80`.
fn explicit_port(descriptor: &str) -> Option<u16> {
    let (_, rest) = descriptor.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let (_, port) = host_port.rsplit_once(':')?;
    port.parse().ok()
}

/// Folds one parsed descriptor into the accumulated configs.
///
/// A config with the same target and the same fingerprint gains `category_tag`
/// (compared case-insensitively, stored upper-case). Anything else is appended as a
/// new config serving only `category_tag`.
pub fn merge(single: SinkConfig, category_tag: &str, configs: &mut Vec<SinkConfig>) {
    let tag = category_tag.trim().to_uppercase();
    let candidate = fingerprint(&single);

    let existing = configs
        .iter_mut()
        .filter(|c| c.target() == single.target())
        .find(|c| fingerprint(c).hash == candidate.hash);
    match existing {
        Some(config) => {
            if !config
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&tag))
            {
                config.categories.push(tag);
            }
        }
        None => {
            let mut single = single;
            single.categories = vec![tag];
            configs.push(single);
        }
    }
}

/// Reads `ENV_SINK_<SHORT>` for every category through `lookup`, returning the
/// category tags and descriptor arguments ready for [`parse_descriptors`].
pub fn descriptors_from_env(
    lookup: impl Fn(&str) -> Option<String>,
) -> (Vec<&'static str>, Vec<String>) {
    Category::ALL
        .iter()
        .map(|category| {
            let arg = lookup(&format!("ENV_SINK_{}", category.short())).unwrap_or_default();
            (category.short(), arg)
        })
        .unzip()
}
