// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]

#[tokio::main]
async fn main() {
    logger::try_init().expect("cannot initialize logger");

    let matches = clap::App::new("mock-dps-server")
        .arg(
            clap::Arg::with_name("port")
                .long("port")
                .value_name("PORT")
                .takes_value(true)
                .required(true)
                .help("localhost port that server listens on"),
        )
        .arg(
            clap::Arg::with_name("assigning polls")
                .long("assigning-polls")
                .value_name("COUNT")
                .takes_value(true)
                .help("number of status polls each operation reports 'assigning' for"),
        )
        .get_matches();

    let port = matches.value_of("port").expect("--port is required");
    let port: u16 = port.parse().expect("--port must be a number");

    let assigning_polls = matches
        .value_of("assigning polls")
        .map_or(1, |polls| polls.parse().expect("--assigning-polls must be a number"));

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("cannot bind to port");

    log::info!("Listening on localhost:{}.", port);

    let context = mock_dps_server::new_context(assigning_polls);

    mock_dps_server::serve(listener, context)
        .await
        .expect("server failed");
}
