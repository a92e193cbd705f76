/// uniffi-bindgen binary for generating language bindings.
///
/// Generates Python/Kotlin/Swift bindings from the compiled rpcgate-uniffi
/// cdylib.
///
/// Usage:
///   cargo run -p rpcgate-uniffi --bin rpcgate-uniffi-bindgen --features cli -- \
///     generate --library -l python -o bindings/python \
///     target/release/librpcgate_uniffi.so
fn main() {
    uniffi::uniffi_bindgen_main();
}
