// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! YAML configuration files.

#![cfg(feature = "config-loaders")]

use hmesh::{Domain, Error, MeshConfig, Publisher, Registry, Subscriber, TransportLayer, TypeDescriptor};
use std::io::Write;

const FULL: &str = r#"
registration:
  refresh_ms: 25
  timeout_ms: 250
  host_name: "cell-7"
transport:
  shm:
    acknowledge_timeout_ms: 2
  udp:
    port: 15000
  tcp:
    number_executor_reader: 2
    max_reconnections: 1
publisher:
  layers: { shm: false, udp: true, tcp: true }
subscriber:
  layers: { shm: true, udp: false, tcp: true }
  priority:
    local: [tcp, shm]
    remote: [tcp]
  inbox_capacity: 16
service:
  server_threads: 1
  default_timeout_ms: 300
"#;

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write");
    file
}

#[test]
fn full_document_loads() {
    let file = write_temp(FULL);
    let config = MeshConfig::from_yaml_file(file.path()).expect("config");

    assert_eq!(config.registration.refresh_ms, 25);
    assert_eq!(config.registration.host_name.as_deref(), Some("cell-7"));
    assert_eq!(config.transport.shm.acknowledge_timeout_ms, 2);
    assert_eq!(config.transport.shm.memfile_min_size_bytes, 4096);
    assert_eq!(config.transport.udp.port, 15000);
    assert_eq!(config.transport.udp.send_buffer, 5 * 1024 * 1024);
    assert_eq!(config.transport.tcp.number_executor_reader, 2);
    assert_eq!(config.transport.tcp.number_executor_writer, 4);
    assert_eq!(config.transport.tcp.max_reconnections, 1);
    assert!(!config.publisher.layers.shm);
    assert_eq!(
        config.subscriber.priority.local(),
        &[TransportLayer::Tcp, TransportLayer::SharedMemory]
    );
    assert_eq!(config.subscriber.inbox_capacity, 16);
    assert_eq!(config.service.server_threads, 1);
}

#[test]
fn loaded_config_drives_selection() {
    let file = write_temp(FULL);
    let config = MeshConfig::from_yaml_file(file.path()).expect("config");
    let domain = Domain::new();
    let registry = Registry::new(&domain, config).expect("registry");
    assert_eq!(registry.host_name(), "cell-7");

    let subscriber = Subscriber::new(&registry, "t", None).expect("subscriber");
    let publisher = Publisher::new(&registry, "t", TypeDescriptor::default()).expect("publisher");
    assert_eq!(
        registry.connection_state(publisher.topic_id(), subscriber.topic_id()),
        hmesh::ConnectionState::Connected(TransportLayer::Tcp)
    );
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.yaml");
    assert!(matches!(
        MeshConfig::from_yaml_file(&path),
        Err(Error::ConfigFileNotFound(_))
    ));
}

#[test]
fn malformed_documents_are_rejected() {
    let unknown_layer = write_temp("publisher:\n  priority:\n    local: [shm, carrier-pigeon]\n");
    assert!(matches!(
        MeshConfig::from_yaml_file(unknown_layer.path()),
        Err(Error::ConfigParse(_))
    ));

    let not_yaml = write_temp("registration: [1, 2");
    assert!(matches!(
        MeshConfig::from_yaml_file(not_yaml.path()),
        Err(Error::ConfigParse(_))
    ));

    let invalid = write_temp("registration:\n  refresh_ms: 100\n  timeout_ms: 50\n");
    assert!(matches!(
        MeshConfig::from_yaml_file(invalid.path()),
        Err(Error::InvalidConfig(_))
    ));
}
