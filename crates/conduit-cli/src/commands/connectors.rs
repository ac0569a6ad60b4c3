use conduit_engine::ConnectorRegistry;

/// Execute the `connectors` command: list the connectors compiled into this binary.
pub fn execute() {
    let registry = ConnectorRegistry::with_builtins();

    println!("Readers:");
    for name in registry.source_names() {
        println!("  {}", name);
    }
    println!("Writers:");
    for name in registry.sink_names() {
        println!("  {}", name);
    }
}
