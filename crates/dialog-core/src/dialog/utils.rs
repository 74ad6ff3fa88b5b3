//! Identifier generation

use rand::Rng;

use rcs_sip_core::BRANCH_MAGIC_COOKIE;

/// A fresh RFC 3261 branch
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, uuid::Uuid::new_v4().simple())
}

/// A fresh From/To tag
pub fn generate_tag() -> String {
    let mut rng = rand::thread_rng();
    format!("{:08x}", rng.gen::<u32>())
}

/// A fresh Call-ID scoped to `host`
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", uuid::Uuid::new_v4().simple(), host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identifiers() {
        let branch = generate_branch();
        assert!(branch.starts_with("z9hG4bK"));
        assert_ne!(branch, generate_branch());
        assert_eq!(generate_tag().len(), 8);
        assert!(generate_call_id("10.0.0.1").ends_with("@10.0.0.1"));
    }
}
