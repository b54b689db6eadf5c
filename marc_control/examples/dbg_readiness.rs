fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::TRACE).init();
    let sim = marc_plc_sim::spawn(marc_plc_sim::SimConfig{
        host: "localhost".into(),
        port: 48555,
        ..marc_plc_sim::SimConfig::default()
    }).expect("sim starts");
    std::thread::sleep(std::time::Duration::from_millis(1500));
    let mut settings = marc_common::config::PlcSettings::default();
    settings.endpoint_url = "opc.tcp://localhost:48555".into();
    let client = marc_plc::PlcClient::new(settings, marc_common::events::EventBus::new());
    match client.initialize() {
        Ok(_) => println!("connected ok"),
        Err(e) => println!("connect error: {e:?}"),
    }
    match client.wait_until_ready(std::time::Duration::from_secs(5)) {
        Ok(_) => println!("ready"),
        Err(e) => println!("ready error: {e:?}"),
    }
    drop(sim);
}
