//! Adds a gateway, loads a RedRat key database, and presses one key.
//!
//! ```sh
//! cargo run --example press_key -- 192.168.1.50 keys.xml "Living Room TV" VolumeUp
//! ```

use globalcache::Dispatcher;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().expect("usage: press_key <host> <keys.xml> <keyset> <key>");
    let keys_path = args.next().expect("missing <keys.xml>");
    let keyset = args.next().expect("missing <keyset>");
    let key = args.next().expect("missing <key>");

    let dispatcher = Dispatcher::new();
    dispatcher
        .add_device(&host)
        .await
        .expect("could not add device");

    let xml = std::fs::read_to_string(&keys_path).expect("could not read key database");
    dispatcher
        .load_redrat_ir_dataset(&xml)
        .expect("could not parse key database");

    let (pressed, timing) = dispatcher
        .press_key(&host, 1, &keyset, &key, None, None)
        .await
        .expect("press_key failed");

    if pressed {
        let duration_ms = timing.map(|t| t.duration_ms).unwrap_or_default();
        println!("sent {keyset}/{key} to {host} in {duration_ms}ms");
    } else {
        println!("no such key: {keyset}/{key}");
    }
}
