//! Small header-building helpers shared by every adapter.

pub fn bearer(headers: &mut Vec<(String, String)>, token: &str) {
    headers.push(("Authorization".to_string(), format!("Bearer {token}")));
}

pub fn api_key(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.push((name.to_string(), value.to_string()));
}

pub fn accept_json(headers: &mut Vec<(String, String)>) {
    headers.push(("Accept".to_string(), "application/json".to_string()));
}

pub fn content_type_json(headers: &mut Vec<(String, String)>) {
    headers.push(("Content-Type".to_string(), "application/json".to_string()));
}

pub fn extend(headers: &mut Vec<(String, String)>, extra: &[(String, String)]) {
    headers.extend(extra.iter().cloned());
}
