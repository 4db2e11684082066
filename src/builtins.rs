//! Builtin natives that are glue around the runtime core: transforms,
//! signatures, subprocess execution and filesystem helpers.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use regex::Regex;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Value};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::Sha256;

use crate::bindings::{throw_exception, to_string};
use crate::promise::ScriptPromise;
use crate::reactor::Outcome;
use crate::runtime::RuntimeState;

type HmacSha256 = Hmac<Sha256>;

pub(crate) fn install<'js>(ctx: &Ctx<'js>, state: &Rc<RuntimeState>) -> rquickjs::Result<()> {
    let global = ctx.globals();

    macro_rules! install_function {
        ($name:literal, $callback:ident) => {{
            let state = Rc::clone(state);
            let function = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
                $callback(&state, ctx, args.0)
            })?
            .with_name($name)?;
            global.set($name, function)?;
        }};
    }

    // String-to-base64 conversions, names per WindowOrWorkerGlobalScope.
    install_function!("atob", base64_decode_callback);
    install_function!("btoa", base64_encode_callback);

    // HMAC signatures, and signing or verifying RSA signatures.
    install_function!("hmac", hmac_callback);
    install_function!("signMessage", sign_message_callback);
    install_function!("verifyMessage", verify_message_callback);

    install_function!("exec", exec_callback);
    install_function!("glob", glob_callback);
    install_function!("readFile", read_file_callback);

    Ok(())
}

fn string_argument<'js>(
    ctx: &Ctx<'js>,
    args: &[Value<'js>],
    index: usize,
    function: &str,
) -> rquickjs::Result<String> {
    match args.get(index).and_then(to_string) {
        Some(value) => Ok(value),
        None => Err(throw_exception(
            ctx,
            format!(
                "unable to execute {function}(): expected a string for argument {}.",
                index + 1
            ),
        )),
    }
}

fn require_arguments<'js>(
    ctx: &Ctx<'js>,
    args: &[Value<'js>],
    required: usize,
    function: &str,
) -> rquickjs::Result<()> {
    if args.len() < required {
        return Err(throw_exception(
            ctx,
            format!(
                "unable to execute {function}(): {required} argument{} required, but only {} provided.",
                if required == 1 { "" } else { "s" },
                args.len()
            ),
        ));
    }
    Ok(())
}

// string atob(string data);
fn base64_decode_callback<'js>(
    _state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<String> {
    require_arguments(&ctx, &args, 1, "atob")?;
    let encoded = string_argument(&ctx, &args, 0, "atob")?;

    // Undecodable input yields an empty string rather than an error.
    Ok(BASE64_STANDARD
        .decode(encoded.as_bytes())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default())
}

// string btoa(string data);
fn base64_encode_callback<'js>(
    _state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<String> {
    require_arguments(&ctx, &args, 1, "btoa")?;
    let plaintext = string_argument(&ctx, &args, 0, "btoa")?;

    Ok(BASE64_STANDARD.encode(plaintext.as_bytes()))
}

// string hmac(string privateKey, string message);
fn hmac_callback<'js>(
    _state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<String> {
    require_arguments(&ctx, &args, 2, "hmac")?;
    let private_key = string_argument(&ctx, &args, 0, "hmac")?;
    let message = string_argument(&ctx, &args, 1, "hmac")?;

    let mut mac = HmacSha256::new_from_slice(private_key.as_bytes()).map_err(|_| {
        throw_exception(
            &ctx,
            "unable to execute hmac(): unable to initialize the digest.".to_string(),
        )
    })?;
    mac.update(message.as_bytes());

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

// string signMessage(string privateKey, string plaintext);
fn sign_message_callback<'js>(
    _state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<String> {
    require_arguments(&ctx, &args, 2, "signMessage")?;
    let private_key = string_argument(&ctx, &args, 0, "signMessage")?;
    let plaintext = string_argument(&ctx, &args, 1, "signMessage")?;

    let key = RsaPrivateKey::from_pkcs1_pem(&private_key)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&private_key))
        .map_err(|_| {
            throw_exception(
                &ctx,
                "unable to execute signMessage(): unable to decode the private key.".to_string(),
            )
        })?;

    let signature = SigningKey::<Sha256>::new(key).sign(plaintext.as_bytes());
    Ok(BASE64_STANDARD.encode(signature.to_bytes()))
}

// bool verifyMessage(string publicKey, string signature, string message);
fn verify_message_callback<'js>(
    _state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<bool> {
    require_arguments(&ctx, &args, 3, "verifyMessage")?;
    let public_key = string_argument(&ctx, &args, 0, "verifyMessage")?;
    let encoded_signature = string_argument(&ctx, &args, 1, "verifyMessage")?;
    let plaintext = string_argument(&ctx, &args, 2, "verifyMessage")?;

    let key = RsaPublicKey::from_public_key_pem(&public_key)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&public_key))
        .map_err(|_| {
            throw_exception(
                &ctx,
                "unable to execute verifyMessage(): unable to decode the public key.".to_string(),
            )
        })?;

    let Ok(decoded) = BASE64_STANDARD.decode(encoded_signature.as_bytes()) else {
        return Ok(false);
    };
    let Ok(signature) = Signature::try_from(decoded.as_slice()) else {
        return Ok(false);
    };

    Ok(VerifyingKey::<Sha256>::new(key)
        .verify(plaintext.as_bytes(), &signature)
        .is_ok())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecResult {
    exit_code: i32,
    output: String,
    error: String,
}

// Promise<{ exitCode, output, error }> exec(string command, ...arguments);
fn exec_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    require_arguments(&ctx, &args, 1, "exec")?;
    let command = string_argument(&ctx, &args, 0, "exec")?;

    let mut argv = Vec::new();
    for index in 1..args.len() {
        argv.push(string_argument(&ctx, &args, index, "exec")?);
    }

    let promise = ScriptPromise::new(&ctx)?;
    let value = promise.value(&ctx)?;
    let token = state.reactor.register(promise);

    state.reactor.spawn(token, async move {
        let result = match tokio::process::Command::new(&command)
            .args(&argv)
            .output()
            .await
        {
            Ok(output) => ExecResult {
                exit_code: output.status.code().unwrap_or(-1),
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
                error: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(err) => ExecResult {
                exit_code: -1,
                output: String::new(),
                error: err.to_string(),
            },
        };

        match serde_json::to_value(&result) {
            Ok(payload) => Outcome::Resolve(payload),
            Err(err) => Outcome::Reject(err.to_string()),
        }
    });

    Ok(value)
}

// sequence<string> glob(string base, string pattern);
fn glob_callback<'js>(
    _state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Vec<String>> {
    require_arguments(&ctx, &args, 2, "glob")?;
    let base = string_argument(&ctx, &args, 0, "glob")?;
    let query = string_argument(&ctx, &args, 1, "glob")?;

    let Ok(matcher) = glob_to_regex(&query) else {
        return Err(throw_exception(
            &ctx,
            format!("unable to execute glob(): invalid expression: {query}"),
        ));
    };

    let mut results = Vec::new();
    collect_files(Path::new(&base), "", &mut results);
    results.retain(|path| matcher.is_match(path));
    results.sort();

    Ok(results)
}

/// Translates a glob pattern into an anchored regex. `**` crosses directory
/// boundaries, `*` and `?` do not.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    expression.push_str(".*");
                } else {
                    expression.push_str("[^/]*");
                }
            }
            '?' => expression.push_str("[^/]"),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }

    expression.push('$');
    Regex::new(&expression)
}

fn collect_files(directory: &Path, prefix: &str, results: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };

        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => {
                collect_files(&entry.path(), &relative, results)
            }
            Ok(file_type) if file_type.is_file() => results.push(relative),
            _ => {}
        }
    }
}

// string readFile(string filename);
fn read_file_callback<'js>(
    _state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<String> {
    require_arguments(&ctx, &args, 1, "readFile")?;
    let filename = string_argument(&ctx, &args, 0, "readFile")?;

    fs::read_to_string(&filename).map_err(|_| {
        throw_exception(
            &ctx,
            format!("unable to execute readFile(): file {filename} does not exist."),
        )
    })
}
