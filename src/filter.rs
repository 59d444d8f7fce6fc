//! escaping of untrusted values used inside LDAP search filters (RFC 4515)

/// escape a value for use as the assertion value of an LDAP filter
///
/// the backslash has to be replaced first, otherwise the backslashes
/// introduced by the other replacements would be escaped again
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// decode the `\hh` escapes of an assertion value taken from a filter
///
/// None if a backslash is not followed by two hex digits or the decoded
/// bytes are not UTF-8
pub fn unescape_filter_value(value: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut rest = value.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'\\' {
            let hex = tail.get(..2)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            bytes.push(u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}

/// build an equality filter `(attribute=value)` with the value escaped
pub fn equality_filter(attribute: &str, value: &str) -> String {
    format!("({}={})", attribute, escape_filter_value(value))
}

/// build a filter matching entries with any of the given object classes
pub fn any_object_class_filter(object_classes: &[&str]) -> String {
    format!(
        "(|{})",
        itertools::join(
            object_classes
                .iter()
                .map(|oc| equality_filter("objectClass", oc)),
            ""
        )
    )
}
