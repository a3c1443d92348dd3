//! Header codec for activity identity and baggage.

use std::borrow::Cow;

use correlation::corr_warn;
use correlation::propagation::{Extractor, Injector, PropagationError};
use correlation::Activity;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

const REQUEST_ID_HEADER: &str = "request-id";
const BAGGAGE_MARKER_HEADER: &str = "x-v";
const BAGGAGE_PREFIX: &str = "x-v-";

const PROPAGATOR_NAME: &str = "CorrelationPropagator";

// Bytes that are not valid HTTP header-name tokens, plus `%` itself.
// Everything else survives verbatim when a baggage key is embedded in a
// header name.
const BAGGAGE_KEY_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'(')
    .add(b')')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'{')
    .add(b'}');

/// The wire names used by the codec.
///
/// | Header | Meaning |
/// |---|---|
/// | `request_id_header` | current activity id of the sender |
/// | `baggage_marker_header` | boolean flag: "baggage headers follow" |
/// | `baggage_prefix` + key | one header per baggage entry |
///
/// Baggage keys are lowercased and percent-encoded when embedded in header
/// names (header names are case-insensitive on the wire), and decoded on
/// extraction; values are carried raw.
#[derive(Clone, Debug)]
pub struct HeaderMapping {
    /// Header carrying the sender's current activity id.
    pub request_id_header: Cow<'static, str>,
    /// Header flagging that baggage headers follow.
    pub baggage_marker_header: Cow<'static, str>,
    /// Prefix under which each baggage entry travels.
    pub baggage_prefix: Cow<'static, str>,
}

impl Default for HeaderMapping {
    fn default() -> Self {
        HeaderMapping {
            request_id_header: Cow::Borrowed(REQUEST_ID_HEADER),
            baggage_marker_header: Cow::Borrowed(BAGGAGE_MARKER_HEADER),
            baggage_prefix: Cow::Borrowed(BAGGAGE_PREFIX),
        }
    }
}

impl HeaderMapping {
    /// The wire header name for a baggage key.
    pub fn baggage_header_name(&self, key: &str) -> String {
        format!(
            "{}{}",
            self.baggage_prefix,
            utf8_percent_encode(&key.to_lowercase(), BAGGAGE_KEY_ESCAPES)
        )
    }

    /// The baggage key for a wire header name, or `None` when the header is
    /// not a baggage header or its key segment does not decode.
    pub fn baggage_key(&self, header_name: &str) -> Option<String> {
        let prefix = self.baggage_prefix.as_ref();
        if header_name.len() <= prefix.len()
            || !header_name[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return None;
        }
        percent_decode_str(&header_name[prefix.len()..])
            .decode_utf8()
            .ok()
            .map(Cow::into_owned)
    }
}

/// Encodes an [`Activity`]'s identity and baggage into a header carrier on
/// egress, and decodes an incoming carrier into a seed [`Activity`] on
/// ingress.
///
/// Decoding is best-effort: a missing or malformed identifier header means
/// "no parent" (the seed becomes a root), and a baggage header that fails
/// to decode is skipped without discarding the rest.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use correlation::Activity;
/// use correlation_http::CorrelationPropagator;
///
/// let propagator = CorrelationPropagator::new();
/// let activity = Activity::new("Http_Out").with_baggage("user", "42").start();
///
/// let mut headers: HashMap<String, String> = HashMap::new();
/// propagator.inject(&activity, &mut headers);
/// activity.stop();
///
/// assert_eq!(headers.get("x-v-user").map(String::as_str), Some("42"));
///
/// // The receiving side reconstructs the lineage and baggage.
/// let seed = propagator.extract("Http_In", &headers);
/// assert_eq!(seed.parent_id(), activity.id().map(|id| id.as_str()));
/// assert_eq!(seed.get_baggage_item("user").as_deref(), Some("42"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct CorrelationPropagator {
    mapping: HeaderMapping,
}

impl CorrelationPropagator {
    /// Creates a propagator with the default [`HeaderMapping`].
    pub fn new() -> Self {
        CorrelationPropagator::default()
    }

    /// Creates a propagator with the given [`HeaderMapping`].
    pub fn with_mapping(mapping: HeaderMapping) -> Self {
        CorrelationPropagator { mapping }
    }

    /// Creates a propagator with custom header names.
    ///
    /// NOTE: it'll implicitly fall back to the default name when a provided
    /// custom name is empty.
    pub fn with_custom_header_and_baggage(
        custom_request_id_header: &'static str,
        custom_baggage_marker_header: &'static str,
        custom_baggage_prefix: &'static str,
    ) -> Self {
        let or_default = |name: &'static str, default: &'static str| {
            let name = name.trim();
            if name.is_empty() {
                default
            } else {
                name
            }
        };
        CorrelationPropagator::with_mapping(HeaderMapping {
            request_id_header: Cow::Borrowed(or_default(
                custom_request_id_header,
                REQUEST_ID_HEADER,
            )),
            baggage_marker_header: Cow::Borrowed(or_default(
                custom_baggage_marker_header,
                BAGGAGE_MARKER_HEADER,
            )),
            baggage_prefix: Cow::Borrowed(or_default(custom_baggage_prefix, BAGGAGE_PREFIX)),
        })
    }

    /// The header names this propagator reads and writes.
    pub fn mapping(&self) -> &HeaderMapping {
        &self.mapping
    }

    /// Writes `activity`'s id and effective baggage into the carrier.
    ///
    /// An unstarted activity has no identity to carry; the call is a logged
    /// no-op.
    pub fn inject(&self, activity: &Activity, injector: &mut dyn Injector) {
        let Some(id) = activity.id() else {
            corr_warn!(
                name: "CorrelationPropagator.Inject.NotStarted",
                error = PropagationError::inject(
                    "activity has no id before start",
                    PROPAGATOR_NAME
                )
                .to_string()
            );
            return;
        };
        injector.set(&self.mapping.request_id_header, id.to_string());

        let baggage = activity.baggage();
        if baggage.is_empty() {
            return;
        }
        injector.set(&self.mapping.baggage_marker_header, "1".to_string());
        // Oldest first, so the carrier's overwrite-on-insert leaves the most
        // recently added value for a shadowed key on the wire.
        for entry in baggage.iter().rev() {
            injector.set(
                &self.mapping.baggage_header_name(&entry.key),
                entry.value.clone(),
            );
        }
    }

    /// Reads a carrier into an inert seed [`Activity`] with the sender's id
    /// as parent id and the carried baggage attached.
    ///
    /// The caller decides what to do with the seed; boundary adapters
    /// typically start it to publish it as the ambient current value.
    pub fn extract(
        &self,
        operation_name: impl Into<Cow<'static, str>>,
        extractor: &dyn Extractor,
    ) -> Activity {
        let mut activity = Activity::new(operation_name);

        if let Some(parent_id) = self
            .extractor_value(extractor, &self.mapping.request_id_header)
            .filter(|id| !id.is_empty())
        {
            activity = activity.with_parent_id(parent_id);
        }

        if self.baggage_marker_set(extractor) {
            for header in extractor.keys() {
                let Some(key) = self.mapping.baggage_key(header) else {
                    if header
                        .to_ascii_lowercase()
                        .starts_with(self.mapping.baggage_prefix.as_ref())
                    {
                        // One undecodable entry never discards the rest.
                        corr_warn!(
                            name: "CorrelationPropagator.Extract.InvalidBaggageKey",
                            header = header.to_string(),
                            error = PropagationError::extract(
                                "baggage key is not valid percent-encoded UTF-8",
                                PROPAGATOR_NAME
                            )
                            .to_string()
                        );
                    }
                    continue;
                };
                if key.is_empty() {
                    continue;
                }
                if let Some(value) = extractor.get(header) {
                    activity = activity.with_baggage(key, value);
                }
            }
        }

        activity
    }

    fn extractor_value(&self, extractor: &dyn Extractor, header: &str) -> Option<String> {
        extractor.get(header).map(|value| value.trim().to_owned())
    }

    fn baggage_marker_set(&self, extractor: &dyn Extractor) -> bool {
        match extractor.get(&self.mapping.baggage_marker_header) {
            Some(value) => {
                let value = value.trim();
                !value.eq_ignore_ascii_case("false") && value != "0"
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn roundtrip(entries: &[(&str, &str)]) -> Activity {
        let propagator = CorrelationPropagator::new();
        let mut activity = Activity::new("Http_Out");
        for (key, value) in entries {
            activity = activity.with_baggage(*key, *value);
        }
        let activity = activity.start();

        let mut headers: HashMap<String, String> = HashMap::new();
        propagator.inject(&activity, &mut headers);
        activity.stop();

        propagator.extract("Http_In", &headers)
    }

    #[test]
    fn roundtrip_preserves_baggage_pairs() {
        let cases: Vec<Vec<(&str, &str)>> = vec![
            vec![],
            vec![("user", "42")],
            vec![("user", "42"), ("tenant", "acme"), ("flag", "")],
            // Keys that need escaping inside a header name.
            vec![("user id", "42"), ("a/b", "1"), ("k=v;x", "2")],
        ];

        for entries in cases {
            let seed = roundtrip(&entries);
            let mut decoded: Vec<(String, String)> = seed
                .baggage()
                .into_iter()
                .map(|kv| (kv.key, kv.value))
                .collect();
            decoded.sort();
            let mut expected: Vec<(String, String)> = entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            expected.sort();
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn roundtrip_carries_the_sender_id() {
        let propagator = CorrelationPropagator::new();
        let activity = Activity::new("Http_Out").start();
        let mut headers: HashMap<String, String> = HashMap::new();
        propagator.inject(&activity, &mut headers);

        let seed = propagator.extract("Http_In", &headers);
        assert_eq!(seed.parent_id(), activity.id().map(|id| id.as_str()));
        activity.stop();
    }

    #[test]
    fn missing_identifier_header_means_root() {
        let propagator = CorrelationPropagator::new();
        let headers: HashMap<String, String> = HashMap::new();
        let seed = propagator.extract("Http_In", &headers);
        assert!(seed.parent_id().is_none());
    }

    #[test]
    fn identifier_and_prefixed_baggage_are_decoded() {
        let propagator = CorrelationPropagator::new();
        let mut headers: HashMap<String, String> = HashMap::new();
        headers.set("request-id", "abc".to_string());
        headers.set("x-v", "1".to_string());
        headers.set("x-v-user", "42".to_string());

        let seed = propagator.extract("Http_In", &headers);
        assert_eq!(seed.parent_id(), Some("abc"));
        assert_eq!(seed.get_baggage_item("user").as_deref(), Some("42"));
    }

    #[test]
    fn baggage_headers_without_marker_are_ignored() {
        let propagator = CorrelationPropagator::new();
        let mut headers: HashMap<String, String> = HashMap::new();
        headers.set("request-id", "abc".to_string());
        headers.set("x-v-user", "42".to_string());

        let seed = propagator.extract("Http_In", &headers);
        assert!(seed.get_baggage_item("user").is_none());
    }

    #[test]
    fn undecodable_baggage_entry_is_skipped_not_fatal() {
        let propagator = CorrelationPropagator::new();
        let mut headers: HashMap<String, String> = HashMap::new();
        headers.set("x-v", "1".to_string());
        // `%ff` decodes to a lone 0xFF byte, which is not UTF-8.
        headers.set("x-v-%ff", "lost".to_string());
        headers.set("x-v-user", "42".to_string());

        let seed = propagator.extract("Http_In", &headers);
        assert_eq!(seed.baggage().len(), 1);
        assert_eq!(seed.get_baggage_item("user").as_deref(), Some("42"));
    }

    #[test]
    fn shadowed_key_travels_with_the_winning_value() {
        let parent = Activity::new("Http_In").with_baggage("user", "42").start();
        let child = Activity::new("Http_Out").with_baggage("user", "7").start();

        let propagator = CorrelationPropagator::new();
        let mut headers: HashMap<String, String> = HashMap::new();
        propagator.inject(&child, &mut headers);

        assert_eq!(headers.get("x-v-user").map(String::as_str), Some("7"));
        child.stop();
        parent.stop();
    }

    #[test]
    fn unstarted_activity_injects_nothing() {
        let propagator = CorrelationPropagator::new();
        let activity = Activity::new("Http_Out").with_baggage("user", "42");
        let mut headers: HashMap<String, String> = HashMap::new();
        propagator.inject(&activity, &mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn no_marker_is_written_without_baggage() {
        let propagator = CorrelationPropagator::new();
        let activity = Activity::new("Http_Out").start();
        let mut headers: HashMap<String, String> = HashMap::new();
        propagator.inject(&activity, &mut headers);
        activity.stop();

        assert!(headers.contains_key("request-id"));
        assert!(!headers.contains_key("x-v"));
    }

    #[test]
    fn mapping_escapes_keys_in_header_names() {
        let mapping = HeaderMapping::default();
        let name = mapping.baggage_header_name("User Id");
        assert_eq!(name, "x-v-user%20id");
        assert_eq!(mapping.baggage_key(&name).as_deref(), Some("user id"));
        assert!(mapping.baggage_key("request-id").is_none());
    }

    #[test]
    fn custom_header_names_fall_back_when_blank() {
        let propagator =
            CorrelationPropagator::with_custom_header_and_baggage("trace-ident", "", "ctx-");
        assert_eq!(propagator.mapping().request_id_header, "trace-ident");
        assert_eq!(propagator.mapping().baggage_marker_header, "x-v");
        assert_eq!(propagator.mapping().baggage_prefix, "ctx-");

        let activity = Activity::new("Http_Out").with_baggage("user", "42").start();
        let mut headers: HashMap<String, String> = HashMap::new();
        propagator.inject(&activity, &mut headers);
        activity.stop();

        assert!(headers.contains_key("trace-ident"));
        assert_eq!(headers.get("ctx-user").map(String::as_str), Some("42"));
    }
}
