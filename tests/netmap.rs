#![cfg(unix)]
mod netmap_tests {
    use netmap_vif::prelude::*;
    use std::io::IoSlice;
    use std::sync::mpsc;
    use std::time::Duration;

    // Two ends of a VALE switch port loop back to each other.
    const PORT_A: &str = "vale0:nmvif_a";
    const PORT_B: &str = "vale0:nmvif_b";

    #[test]
    #[ignore = "needs the netmap kernel module"]
    fn test_vale_ports_exchange_a_frame() {
        let (tx, rx) = mpsc::channel();
        let mut a = Bridge::create(BridgeConfig::new(PORT_A), NoopScheduler, |_: &Frame<'_>| {})
            .expect("Failed to open port A");
        let b = Bridge::create(BridgeConfig::new(PORT_B), NoopScheduler, move |f: &Frame<'_>| {
            let _ = tx.send(f.payload().to_vec());
        })
        .expect("Failed to open port B");

        // Broadcast destination so the switch floods it to B.
        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 1, 0x88, 0xb5]);
        frame.resize(64, 0);
        assert!(matches!(a.send(&[IoSlice::new(&frame)]), SendOutcome::Sent { len: 64, .. }));

        let got = rx.recv_timeout(Duration::from_secs(1)).expect("frame reached port B");
        assert_eq!(got, frame);
        assert!(a.hardware_address().is_zero());

        a.dying();
        b.dying();
        a.destroy();
        b.destroy();
    }

    #[test]
    fn test_missing_device_is_reported() {
        let cfg = BridgeConfig::new("em0").device_path("/nonexistent/netmap");
        let err = Bridge::create(cfg, NoopScheduler, |_: &Frame<'_>| {}).err();
        assert!(matches!(err, Some(Error::DeviceUnavailable { .. })));
    }
}
