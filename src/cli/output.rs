use serde_json::Value;

pub fn print_profile(profile: &Value) {
    println!("certling info: profile");
    if let Some(contacts) = profile.get("contact").and_then(Value::as_array) {
        for contact in contacts.iter().filter_map(Value::as_str) {
            println!("- contact: {contact}");
        }
    }
    if let Some(agreement) = profile.get("agreement").and_then(Value::as_str) {
        println!("- agreement: {agreement}");
    }
    if let Some(key) = profile.get("key")
        && let Some(kty) = key.get("kty").and_then(Value::as_str)
    {
        println!("- key type: {kty}");
    }
}

pub fn print_registration(account_url: &str) {
    println!("certling reg: account registered");
    println!("- account url: {account_url}");
}

pub fn print_authorization(domain: &str, status: &str) {
    println!("certling add: authorization for {domain}: {status}");
}

pub fn print_certificate(path: &std::path::Path) {
    println!("certling add: certificate issued");
    println!("- certificate: {}", path.display());
}

pub fn print_csr(file_stem: &str) {
    println!("certling csr: key and request generated");
    println!("- key: {file_stem}.key");
    println!("- csr: {file_stem}.csr");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // Smoke tests: the printers must tolerate sparse profiles.
    #[test]
    fn test_print_profile_with_missing_fields() {
        print_profile(&json!({}));
        print_profile(&json!({ "contact": ["mailto:a@b.c", 42] }));
        print_profile(&json!({
            "contact": [],
            "agreement": "https://ca.example/tos",
            "key": { "kty": "RSA" },
        }));
    }
}
