//! End-to-end tests against the in-process simulator.
//!
//! Run with: `cargo test --test simulated_device`

use psg9080::config::ProtocolConfig;
use psg9080::device::{
    Channel, ChannelSettings, Frequency, FrequencyUnit, Parameter, Setting, SignalGenerator,
    Waveform,
};
use psg9080::protocol::Response;
use psg9080::simulator::{Simulator, SimulatorHandle};

fn connect() -> (SignalGenerator, SimulatorHandle) {
    let (connection, sim) = Simulator::spawn();
    let generator = SignalGenerator::from_connection(connection, &ProtocolConfig::default());
    (generator, sim)
}

#[tokio::test]
async fn test_set_frequency_end_to_end() {
    let (generator, sim) = connect();

    generator
        .set_frequency(Channel::One, Frequency::hz(1000.0))
        .await
        .unwrap();

    assert_eq!(sim.received().await, vec![":w13=1000000,0.".to_string()]);
    assert_eq!(sim.register(13).await, Some(vec![1_000_000, 0]));

    // Served from the cache, no further traffic
    let state = generator.channel_state(Channel::One).await;
    assert_eq!(state.frequency, Some(Frequency::hz(1000.0)));
    assert_eq!(sim.received().await.len(), 1);
}

#[tokio::test]
async fn test_refresh_reads_everything_in_order() {
    let (generator, sim) = connect();
    sim.set_register(10, vec![1, 0]).await;
    sim.set_register(12, vec![3]).await;
    sim.set_register(18, vec![750]).await;

    let state = generator.refresh().await.unwrap();

    let expected: Vec<String> = (10..=22).map(|op| format!(":r{op}=0.")).collect();
    assert_eq!(sim.received().await, expected);

    let ch1 = state.channel(Channel::One);
    assert!(ch1.is_complete());
    assert_eq!(ch1.output, Some(true));
    assert_eq!(ch1.waveform, Some(Waveform::Sine));
    assert_eq!(ch1.frequency, Some(Frequency::new(1000.0, FrequencyUnit::Hz)));
    assert_eq!(ch1.amplitude, Some(5.0));
    assert_eq!(ch1.duty_cycle, Some(50.0));

    let ch2 = state.channel(Channel::Two);
    assert_eq!(ch2.output, Some(false));
    assert_eq!(ch2.waveform, Some(Waveform::Triangle));
    assert_eq!(ch2.offset, Some(-2.5));
    assert_eq!(ch2.phase, Some(0.0));
}

#[tokio::test]
async fn test_typed_reads_decode_device_values() {
    let (generator, sim) = connect();
    sim.set_register(14, vec![2500, 1]).await;
    sim.set_register(16, vec![12_345]).await;
    sim.set_register(20, vec![2550]).await;
    sim.set_register(22, vec![18_000]).await;

    assert_eq!(
        generator.read_frequency(Channel::Two).await.unwrap(),
        Frequency::khz(2.5)
    );
    assert_eq!(generator.read_amplitude(Channel::Two).await.unwrap(), 12.345);
    assert_eq!(generator.read_duty_cycle(Channel::Two).await.unwrap(), 25.5);
    assert_eq!(generator.read_phase(Channel::Two).await.unwrap(), 180.0);
    assert_eq!(generator.read_offset(Channel::One).await.unwrap(), 0.0);
    assert_eq!(generator.read_outputs().await.unwrap(), (false, false));
}

#[tokio::test]
async fn test_invalid_register_value_is_frame_error() {
    let (generator, sim) = connect();
    sim.set_register(11, vec![40]).await;

    let err = generator.read_waveform(Channel::One).await.unwrap_err();
    assert!(matches!(err, psg9080::DriverError::Frame(_)));
    assert!(generator.channel_state(Channel::One).await.waveform.is_none());
}

#[tokio::test]
async fn test_apply_and_read_back() {
    let (generator, sim) = connect();
    let settings = ChannelSettings {
        waveform: Some(Waveform::Square),
        frequency: Some(Frequency::mhz(1.5)),
        amplitude: Some(3.3),
        offset: Some(-1.25),
        duty_cycle: Some(25.0),
        phase: Some(90.0),
        output: Some(true),
    };

    generator.apply(Channel::Two, &settings).await.unwrap();
    assert_eq!(
        sim.received().await,
        vec![
            ":w12=1.",
            ":w14=1500,2.",
            ":w16=3300.",
            ":w18=875.",
            ":w20=2500.",
            ":w22=9000.",
            ":r10=0.",
            ":w10=0,1.",
        ]
    );

    let confirmed = generator.read(Parameter::Offset, Channel::Two).await.unwrap();
    assert_eq!(confirmed, Setting::Offset(Channel::Two, -1.25));
}

#[tokio::test]
async fn test_redundant_writes_skip_the_wire() {
    let (generator, sim) = connect();
    generator.set_waveform(Channel::One, Waveform::Noise).await.unwrap();
    generator.set_waveform(Channel::One, Waveform::Noise).await.unwrap();
    assert_eq!(sim.received().await.len(), 1);

    let config = ProtocolConfig {
        skip_redundant_writes: false,
        ..Default::default()
    };
    let (connection, sim) = Simulator::spawn();
    let generator = SignalGenerator::from_connection(connection, &config);
    generator.set_waveform(Channel::One, Waveform::Noise).await.unwrap();
    generator.set_waveform(Channel::One, Waveform::Noise).await.unwrap();
    assert_eq!(sim.received().await.len(), 2);
}

#[tokio::test]
async fn test_raw_commands() {
    let (generator, sim) = connect();

    let response = generator.send_raw(":w15=1234.").await.unwrap();
    assert_eq!(response, Response::Ack);
    assert_eq!(generator.channel_state(Channel::One).await.amplitude, Some(1.234));

    sim.set_register(21, vec![4500]).await;
    let response = generator.send_raw(":r21=0.").await.unwrap();
    assert_eq!(response.to_string(), ":r21=4500.");
    assert_eq!(generator.channel_state(Channel::One).await.phase, Some(45.0));

    // Accepted by the device, but not a valid waveform index
    generator.set_waveform(Channel::Two, Waveform::Sine).await.unwrap();
    generator.send_raw(":w12=99.").await.unwrap();
    assert_eq!(generator.channel_state(Channel::Two).await.waveform, None);
}

#[tokio::test]
async fn test_set_output_preserves_unknown_other_channel() {
    let (generator, sim) = connect();
    // CH2 was switched on from the front panel
    sim.set_register(10, vec![0, 1]).await;

    generator.set_output(Channel::One, true).await.unwrap();

    assert_eq!(sim.received().await, vec![":r10=0.", ":w10=1,1."]);
    assert_eq!(sim.register(10).await, Some(vec![1, 1]));
    let state = generator.state().await;
    assert_eq!(state.channel(Channel::One).output, Some(true));
    assert_eq!(state.channel(Channel::Two).output, Some(true));

    // Known now, no second query
    generator.set_output(Channel::Two, false).await.unwrap();
    assert_eq!(sim.received().await.len(), 3);
    assert_eq!(sim.register(10).await, Some(vec![1, 0]));
}

#[tokio::test]
async fn test_concurrent_output_enables_both_land() {
    let (generator, sim) = connect();
    let other = generator.clone();

    let (first, second) = tokio::join!(
        generator.set_output(Channel::One, true),
        other.set_output(Channel::Two, true)
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(sim.register(10).await, Some(vec![1, 1]));
    let state = generator.state().await;
    assert_eq!(state.channel(Channel::One).output, Some(true));
    assert_eq!(state.channel(Channel::Two).output, Some(true));
}

#[tokio::test]
async fn test_concurrent_setters_leave_cache_matching_device() {
    let (generator, sim) = connect();

    let tasks: Vec<_> = (1..=10u32)
        .map(|i| {
            let generator = generator.clone();
            tokio::spawn(async move {
                generator
                    .set_amplitude(Channel::One, f64::from(i) * 0.5)
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Whatever order they ran in, the cache holds what the device holds
    let register = sim.register(15).await.unwrap();
    let cached = generator.channel_state(Channel::One).await.amplitude.unwrap();
    assert_eq!(register, vec![(cached * 1000.0).round() as u64]);

    // So re-sending the device's value is correctly skipped, and any other is not
    let before = sim.received().await.len();
    generator.set_amplitude(Channel::One, cached).await.unwrap();
    assert_eq!(sim.received().await.len(), before);
    let different = if cached == 0.5 { 1.0 } else { 0.5 };
    generator.set_amplitude(Channel::One, different).await.unwrap();
    assert_eq!(sim.received().await.len(), before + 1);
}
