use rand::Rng;

use crate::statement::password_hash;

/// Random password of the given length.
pub fn generate_password(length: u8) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                            abcdefghijklmnopqrstuvwxyz\
                            0123456789)(*&^%$#@!~";

    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Print a password, generated unless given, and its md5 role hash when a username is
/// known. The hash can go straight into `ENCRYPTED PASSWORD '...'`.
pub fn gen_password(length: u8, username: Option<&str>, password: Option<&str>) {
    let password = password
        .map(str::to_string)
        .unwrap_or_else(|| generate_password(length));

    println!("Generated password: {}", password);

    match username {
        Some(username) => println!(
            "Generated MD5 (user: {}): {}",
            username,
            password_hash(username, &password)
        ),
        None => println!("Hint: Please provide --username to generate MD5"),
    }
}
