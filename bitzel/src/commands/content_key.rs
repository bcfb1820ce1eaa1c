//! `bitzel content-key`

use convenient_cache::SecondLevelContentKey;

/// Print the decoded parts of each key
pub fn execute(keys: &[String]) {
    for raw in keys {
        let key = SecondLevelContentKey::parse(raw);
        println!("{raw}");
        println!("  type:   {:?}", key.kind());
        println!("  key:    {}", key.key());
        println!("  hash:   {}", key.digest_hash());
        println!("  bytes:  {}", key.digest_bytes());
    }
}
