// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! A build script to generate the fb-chain gRPC API (client and server stubs).

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The gRPC stubs are vendored in `src/` to avoid depending on protoc in
    // GitHub Actions.
    //
    // To regenerate the gRPC API from the proto files:
    // - Uncomment the following lines.
    // - Run `cargo build` to regenerate the API.
    // - Comment the following lines.
    // - Commit the changes.
    // tonic_build::configure()
    //     .out_dir("src")
    //     .compile_protos(
    //         &[
    //             "proto/fbchain/chain/v1/chain.proto",
    //             "proto/fbchain/control/v1/control.proto",
    //         ],
    //         &["proto"],
    //     )?;
    Ok(())
}
