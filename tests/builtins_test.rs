mod common;

use std::fs;

use common::create_host;

#[test]
fn base64_round_trips_through_atob_and_btoa() {
    let host = create_host();

    let encoded: String = host
        .runtime
        .eval_with("btoa('Las Venturas')", "builtins.js")
        .expect("encode");
    assert_eq!(encoded, "TGFzIFZlbnR1cmFz");

    let decoded: String = host
        .runtime
        .eval_with("atob(btoa('round trip'))", "builtins.js")
        .expect("decode");
    assert_eq!(decoded, "round trip");
}

#[test]
fn undecodable_base64_yields_an_empty_string() {
    let host = create_host();

    let decoded: String = host
        .runtime
        .eval_with("atob('!!! not base64 !!!')", "builtins.js")
        .expect("decode");
    assert_eq!(decoded, "");
}

#[test]
fn base64_builtins_validate_arguments() {
    let host = create_host();

    let message: String = host
        .runtime
        .eval_with(
            r#"(() => { try { atob(); return ''; } catch (e) { return String(e); } })()"#,
            "builtins.js",
        )
        .expect("evaluate");
    assert!(message.contains("1 argument required"), "got: {message}");
}

#[test]
fn hmac_is_deterministic_and_key_sensitive() {
    let host = create_host();

    let signatures: String = host
        .runtime
        .eval_with(
            r#"
                JSON.stringify([
                    hmac('key', 'message') === hmac('key', 'message'),
                    hmac('key', 'message') !== hmac('other', 'message'),
                    hmac('key', 'message').length,
                ])
            "#,
            "builtins.js",
        )
        .expect("sign");

    // A SHA-256 digest is 32 bytes, which base64 encodes to 44 characters.
    assert_eq!(signatures, "[true,true,44]");
}

#[test]
fn signing_with_a_malformed_key_throws() {
    let host = create_host();

    let message: String = host
        .runtime
        .eval_with(
            r#"(() => { try { signMessage('garbage', 'payload'); return ''; } catch (e) { return String(e); } })()"#,
            "builtins.js",
        )
        .expect("evaluate");
    assert!(
        message.contains("unable to decode the private key"),
        "got: {message}"
    );

    let verify_message: String = host
        .runtime
        .eval_with(
            r#"(() => { try { verifyMessage('garbage', 'c2ln', 'payload'); return ''; } catch (e) { return String(e); } })()"#,
            "builtins.js",
        )
        .expect("evaluate");
    assert!(
        verify_message.contains("unable to decode the public key"),
        "got: {verify_message}"
    );
}

#[test]
fn read_file_returns_contents_and_throws_on_missing_files() {
    let directory = tempfile::tempdir().expect("tempdir");
    let path = directory.path().join("greeting.txt");
    fs::write(&path, "hello from disk").expect("write");

    let host = create_host();

    let contents: String = host
        .runtime
        .eval_with(
            &format!("readFile({:?})", path.display().to_string()),
            "builtins.js",
        )
        .expect("read");
    assert_eq!(contents, "hello from disk");

    let message: String = host
        .runtime
        .eval_with(
            r#"(() => { try { readFile('/no/such/file'); return ''; } catch (e) { return String(e); } })()"#,
            "builtins.js",
        )
        .expect("evaluate");
    assert!(message.contains("does not exist"), "got: {message}");
}

#[test]
fn glob_matches_within_directory_boundaries() {
    let directory = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(directory.path().join("nested")).expect("mkdir");
    fs::write(directory.path().join("main.js"), "").expect("write");
    fs::write(directory.path().join("notes.txt"), "").expect("write");
    fs::write(directory.path().join("nested/feature.js"), "").expect("write");

    let host = create_host();
    let base = directory.path().display().to_string();

    let shallow: String = host
        .runtime
        .eval_with(
            &format!("JSON.stringify(glob({base:?}, '*.js'))"),
            "builtins.js",
        )
        .expect("glob");
    assert_eq!(shallow, r#"["main.js"]"#);

    let recursive: String = host
        .runtime
        .eval_with(
            &format!("JSON.stringify(glob({base:?}, '**.js'))"),
            "builtins.js",
        )
        .expect("glob");
    assert_eq!(recursive, r#"["main.js","nested/feature.js"]"#);
}
