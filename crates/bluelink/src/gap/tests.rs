//! Tests for the GAP implementation

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::error::HciError;
    use crate::hci::constants::*;
    use crate::hci::mock::*;
    use crate::hci::packet::opcode;
    use crate::hci::HciEngine;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    const PEER: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
    const WAIT: Duration = Duration::from_secs(2);

    fn le(ocf: u16) -> u16 {
        opcode(OGF_LE, ocf)
    }

    fn dialing() -> Transition {
        Transition::Dialing {
            peer: BdAddr::new(PEER),
            peer_type: AddressType::Public,
        }
    }

    fn flags(advertising: bool, scanning: bool, dialing: bool, listening: bool) -> RadioFlags {
        RadioFlags {
            advertising,
            scanning,
            dialing,
            listening,
        }
    }

    fn settings() -> RadioSettings {
        RadioSettings {
            scan: ScanParams::default(),
            adv: AdvParams::default(),
            conn: ConnParams::default(),
            own_address_type: PUBLIC_DEVICE_ADDRESS,
        }
    }

    fn radio_rig() -> (Arc<MockTransport>, HciEngine, Radio) {
        let mock = MockTransport::controller();
        let engine = HciEngine::start(mock.clone()).unwrap();
        let radio = Radio::start(engine.commander(), settings()).unwrap();
        (mock, engine, radio)
    }

    fn device_rig() -> (Arc<MockTransport>, Arc<Device>) {
        let mock = MockTransport::controller();
        let device = Device::with_transport(mock.clone(), DeviceConfig::default()).unwrap();
        mock.clear_written();
        (mock, Arc::new(device))
    }

    fn advertise_enables(mock: &MockTransport) -> Vec<u8> {
        mock.commands()
            .into_iter()
            .filter(|(op, _)| *op == le(OCF_LE_SET_ADVERTISE_ENABLE))
            .map(|(_, params)| params[0])
            .collect()
    }

    #[test]
    fn test_scanning_rules() {
        assert_eq!(decide(RadioFlags::default(), &Transition::Scanning), Verdict::Proceed);
        assert_eq!(
            decide(flags(false, true, false, false), &Transition::Scanning),
            Verdict::Unchanged
        );
        assert!(matches!(
            decide(flags(false, false, true, false), &Transition::Scanning),
            Verdict::Conflict(_)
        ));
        assert_eq!(
            decide(RadioFlags::default(), &Transition::StopScanning),
            Verdict::Unchanged
        );
    }

    #[test]
    fn test_dialing_rules() {
        assert_eq!(decide(RadioFlags::default(), &dialing()), Verdict::Proceed);
        assert!(matches!(
            decide(flags(false, true, false, false), &dialing()),
            Verdict::Conflict(_)
        ));
        assert!(matches!(
            decide(flags(false, false, true, false), &dialing()),
            Verdict::Conflict(_)
        ));
        // Advertising and dialing may overlap
        assert_eq!(decide(flags(true, false, false, false), &dialing()), Verdict::Proceed);

        assert_eq!(
            decide(RadioFlags::default(), &Transition::DialingCanceling),
            Verdict::Unchanged
        );
        assert_eq!(
            decide(flags(false, false, true, false), &Transition::DialingCanceling),
            Verdict::Proceed
        );
    }

    #[test]
    fn test_listening_rules() {
        assert_eq!(decide(RadioFlags::default(), &Transition::Listening), Verdict::Proceed);
        assert!(matches!(
            decide(flags(false, false, false, true), &Transition::Listening),
            Verdict::Conflict(_)
        ));
        assert!(matches!(
            decide(flags(true, false, false, false), &Transition::Listening),
            Verdict::Conflict(_)
        ));
        assert_eq!(
            decide(RadioFlags::default(), &Transition::CentralDisconnected),
            Verdict::Unchanged
        );
        assert_eq!(
            decide(flags(false, false, false, true), &Transition::CentralDisconnected),
            Verdict::Proceed
        );
    }

    #[test]
    fn test_disallowed_is_swallowed_only_where_expected() {
        assert!(swallows(&Transition::Advertising, HCI_COMMAND_DISALLOWED));
        assert!(swallows(&dialing(), HCI_COMMAND_DISALLOWED));
        assert!(swallows(&Transition::CentralDisconnected, HCI_COMMAND_DISALLOWED));

        assert!(!swallows(&Transition::Listening, HCI_COMMAND_DISALLOWED));
        assert!(!swallows(&Transition::Scanning, HCI_COMMAND_DISALLOWED));
        assert!(!swallows(&Transition::Advertising, HCI_CONN_LIMIT_EXCEEDED));
    }

    #[test]
    fn test_flags_after_transition() {
        let listening = flags(false, false, false, true);
        assert_eq!(
            listening.after(&Transition::CentralConnected),
            RadioFlags::default()
        );

        let busy = flags(true, true, true, false);
        assert!(!busy.after(&Transition::DialingCanceling).dialing);
        assert!(!busy.after(&Transition::StopDialing).dialing);
        assert_eq!(
            busy.after(&Transition::ScanParamsUpdated(ScanParams::default())),
            busy
        );
        assert!(listening.advertising_enabled());
        assert!(!RadioFlags::default().advertising_enabled());
    }

    #[test]
    fn test_dial_while_scanning_conflicts() {
        let (mock, _engine, radio) = radio_rig();

        assert_eq!(radio.request(Transition::Scanning).unwrap(), Outcome::Applied);
        let commands = mock.commands();
        assert_eq!(commands[0].0, le(OCF_LE_SET_SCAN_PARAMETERS));
        assert_eq!(commands[1], (le(OCF_LE_SET_SCAN_ENABLE), vec![0x01, 0x01]));

        assert!(matches!(
            radio.request(dialing()),
            Err(GapError::Conflict(_))
        ));
        assert!(radio.flags().scanning);
        assert_eq!(mock.command_count(le(OCF_LE_CREATE_CONNECTION)), 0);

        assert_eq!(radio.request(Transition::Scanning).unwrap(), Outcome::Unchanged);
        assert_eq!(mock.command_count(le(OCF_LE_SET_SCAN_ENABLE)), 1);
    }

    #[test]
    fn test_second_dial_conflicts_in_radio() {
        let (mock, _engine, radio) = radio_rig();

        assert_eq!(radio.request(dialing()).unwrap(), Outcome::Applied);
        assert!(matches!(
            radio.request(dialing()),
            Err(GapError::Conflict(_))
        ));
        assert_eq!(mock.command_count(le(OCF_LE_CREATE_CONNECTION)), 1);

        radio.notifier().notify(Transition::StopDialing);
        assert!(wait_until(WAIT, || !radio.flags().dialing));
        assert_eq!(mock.command_count(le(OCF_LE_CREATE_CONNECTION_CANCEL)), 0);
    }

    #[test]
    fn test_disallowed_advertising_is_swallowed() {
        let (mock, _engine, radio) = radio_rig();
        let enable = le(OCF_LE_SET_ADVERTISE_ENABLE);
        mock.reply_with(enable, vec![command_complete(enable, &[HCI_COMMAND_DISALLOWED])]);

        assert_eq!(
            radio.request(Transition::Advertising).unwrap(),
            Outcome::Swallowed {
                status: HCI_COMMAND_DISALLOWED
            }
        );
        assert!(radio.flags().advertising);

        radio.request(Transition::StopAdvertising).unwrap_err();
        assert!(radio.flags().advertising);
    }

    #[test]
    fn test_rejected_listening_keeps_flags() {
        let (mock, _engine, radio) = radio_rig();
        let enable = le(OCF_LE_SET_ADVERTISE_ENABLE);
        mock.reply_with(enable, vec![command_complete(enable, &[HCI_COMMAND_DISALLOWED])]);

        match radio.request(Transition::Listening) {
            Err(GapError::Hci(HciError::CommandFailed { opcode, status })) => {
                assert_eq!(opcode, enable);
                assert_eq!(status, HCI_COMMAND_DISALLOWED);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(radio.flags(), RadioFlags::default());
    }

    #[test]
    fn test_scan_update_restarts_active_scan() {
        let (mock, _engine, radio) = radio_rig();
        radio.request(Transition::Scanning).unwrap();
        mock.clear_written();

        let params = ScanParams {
            scan_type: LE_SCAN_PASSIVE,
            interval: 0x0060,
            window: 0x0030,
            ..ScanParams::default()
        };
        radio.request(Transition::ScanParamsUpdated(params)).unwrap();

        let commands = mock.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], (le(OCF_LE_SET_SCAN_ENABLE), vec![0x00, 0x00]));
        assert_eq!(commands[1].0, le(OCF_LE_SET_SCAN_PARAMETERS));
        assert_eq!(&commands[1].1[..5], &[LE_SCAN_PASSIVE, 0x60, 0x00, 0x30, 0x00]);
        assert_eq!(commands[2], (le(OCF_LE_SET_SCAN_ENABLE), vec![0x01, 0x01]));
        assert!(radio.flags().scanning);
    }

    #[test]
    fn test_adv_update_while_idle_only_pushes_parameters() {
        let (mock, _engine, radio) = radio_rig();
        let params = AdvParams {
            adv_data: vec![0x02, 0x01, 0x06],
            ..AdvParams::default()
        };
        radio.request(Transition::AdvParamsUpdated(params)).unwrap();

        let ops: Vec<u16> = mock.commands().into_iter().map(|(op, _)| op).collect();
        assert_eq!(
            ops,
            vec![
                le(OCF_LE_SET_ADVERTISING_PARAMETERS),
                le(OCF_LE_SET_ADVERTISING_DATA),
                le(OCF_LE_SET_SCAN_RESPONSE_DATA),
            ]
        );
        assert_eq!(mock.commands()[1].1[..4], [3, 0x02, 0x01, 0x06]);
    }

    #[test]
    fn test_conn_update_applies_to_next_dial() {
        let (mock, _engine, radio) = radio_rig();
        let params = ConnParams {
            interval_min: 0x0010,
            interval_max: 0x0020,
            ..ConnParams::default()
        };
        assert_eq!(
            radio.request(Transition::ConnParamsUpdated(params)).unwrap(),
            Outcome::Applied
        );
        assert!(mock.commands().is_empty());

        radio.request(dialing()).unwrap();
        let (_, sent) = mock.commands().pop().unwrap();
        // scan interval, window, filter, peer type, peer(6), own type
        assert_eq!(&sent[13..17], &[0x10, 0x00, 0x20, 0x00]);
    }

    #[test]
    fn test_device_init_sequence() {
        let mock = MockTransport::controller();
        let device = Device::with_transport(mock.clone(), DeviceConfig::default()).unwrap();

        let ops: Vec<u16> = mock.commands().into_iter().map(|(op, _)| op).collect();
        assert_eq!(
            ops,
            vec![
                opcode(OGF_HOST_CTL, OCF_RESET),
                opcode(OGF_HOST_CTL, OCF_SET_EVENT_MASK),
                le(OCF_LE_SET_EVENT_MASK),
                opcode(OGF_INFO_PARAM, OCF_READ_BD_ADDR),
                le(OCF_LE_READ_BUFFER_SIZE),
                le(OCF_LE_SET_ADVERTISING_PARAMETERS),
                le(OCF_LE_SET_ADVERTISING_DATA),
                le(OCF_LE_SET_SCAN_RESPONSE_DATA),
            ]
        );
        assert_eq!(device.local_address(), BdAddr::new(MOCK_BD_ADDR));
        assert_eq!(device.address_type(), AddressType::Public);
        assert_eq!(device.buffer_pool().capacity(), MOCK_ACL_PKTS as usize);
        assert_eq!(device.buffer_pool().buffer_size(), MOCK_ACL_LEN as usize);
    }

    #[test]
    fn test_buffer_size_falls_back_to_shared_pool() {
        let mock = MockTransport::controller();
        let le_size = le(OCF_LE_READ_BUFFER_SIZE);
        let size = opcode(OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE);
        mock.reply_with(le_size, vec![command_complete(le_size, &[0, 0, 0, 0])]);
        mock.reply_with(
            size,
            vec![command_complete(size, &[0, 0xFB, 0x00, 0x40, 0x0A, 0x00, 0x08, 0x00])],
        );

        let device = Device::with_transport(mock.clone(), DeviceConfig::default()).unwrap();
        assert_eq!(device.buffer_pool().capacity(), 10);
        assert_eq!(device.buffer_pool().buffer_size(), 251);
    }

    #[test]
    fn test_random_address_is_configured() {
        let mock = MockTransport::controller();
        let config = DeviceConfig {
            use_random_address: true,
            ..DeviceConfig::default()
        };
        let device = Device::with_transport(mock.clone(), config).unwrap();

        let addr = device.local_address();
        assert!(addr.is_static_random());
        assert_eq!(device.address_type(), AddressType::Random);

        let commands = mock.commands();
        let (_, sent) = commands
            .iter()
            .find(|(op, _)| *op == le(OCF_LE_SET_RANDOM_ADDRESS))
            .unwrap();
        assert_eq!(sent.as_slice(), addr.as_slice());

        let (_, adv) = commands
            .iter()
            .find(|(op, _)| *op == le(OCF_LE_SET_ADVERTISING_PARAMETERS))
            .unwrap();
        assert_eq!(adv[5], RANDOM_DEVICE_ADDRESS);
    }

    #[test]
    fn test_oversized_advertising_data_is_refused() {
        let config = DeviceConfig {
            adv: AdvParams {
                adv_data: vec![0; MAX_ADV_DATA_LEN + 1],
                ..AdvParams::default()
            },
            ..DeviceConfig::default()
        };
        let mock = MockTransport::controller();
        assert!(matches!(
            Device::with_transport(mock.clone(), config),
            Err(GapError::InvalidParameter(_))
        ));
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_device_parameter_updates() {
        let (mock, device) = device_rig();
        assert_eq!(device.advertise().unwrap(), Outcome::Applied);

        let too_long = AdvParams {
            scan_response: vec![0; MAX_ADV_DATA_LEN + 1],
            ..AdvParams::default()
        };
        assert!(matches!(
            device.update_adv_params(too_long),
            Err(GapError::InvalidParameter(_))
        ));

        mock.clear_written();
        let beacon = AdvParams {
            adv_type: ADV_NONCONN_IND,
            ..AdvParams::default()
        };
        assert_eq!(device.update_adv_params(beacon).unwrap(), Outcome::Applied);
        let commands = mock.commands();
        assert_eq!(commands.first().map(|(op, _)| *op), Some(le(OCF_LE_SET_ADVERTISE_ENABLE)));
        assert_eq!(commands[1].0, le(OCF_LE_SET_ADVERTISING_PARAMETERS));
        assert_eq!(commands[1].1[4], ADV_NONCONN_IND);
        assert_eq!(advertise_enables(&mock), vec![0, 1]);
        assert!(device.radio_flags().advertising);

        // Idle scanning and connection updates touch no controller state
        mock.clear_written();
        assert_eq!(device.update_scan_params(ScanParams::default()).unwrap(), Outcome::Applied);
        assert_eq!(device.update_conn_params(ConnParams::default()).unwrap(), Outcome::Applied);
        assert!(mock.commands().is_empty());

        assert_eq!(device.stop_advertising().unwrap(), Outcome::Applied);
        assert_eq!(advertise_enables(&mock), vec![0]);
        assert!(!device.radio_flags().advertising);
    }

    #[test]
    fn test_second_dial_conflicts_and_first_completes() {
        let (mock, device) = device_rig();

        let first = {
            let device = device.clone();
            thread::spawn(move || {
                device.dial_with_timeout(BdAddr::new(PEER), AddressType::Public, None)
            })
        };
        assert!(wait_until(WAIT, || device.radio_flags().dialing));

        assert!(matches!(
            device.dial_with_timeout(BdAddr::new(PEER), AddressType::Random, None),
            Err(GapError::Conflict(_))
        ));

        mock.push(le_connection_complete(HCI_SUCCESS, 0x0040, LE_ROLE_CENTRAL, PEER));
        let conn = first.join().unwrap().unwrap();
        assert_eq!(conn.handle(), 0x0040);
        assert_eq!(conn.role(), Role::Central);
        assert_eq!(conn.peer_addr(), BdAddr::new(PEER));
        assert_eq!(conn.local_addr(), BdAddr::new(MOCK_BD_ADDR));

        assert!(wait_until(WAIT, || !device.radio_flags().dialing));
        assert_eq!(mock.command_count(le(OCF_LE_CREATE_CONNECTION)), 1);
        assert_eq!(device.connections().len(), 1);
    }

    #[test]
    fn test_dial_timeout_cancels_and_waits() {
        let (mock, device) = device_rig();
        let cancel = le(OCF_LE_CREATE_CONNECTION_CANCEL);
        mock.reply_with(
            cancel,
            vec![
                command_complete(cancel, &[HCI_SUCCESS]),
                le_connection_complete(HCI_UNKNOWN_CONN_ID, 0x0000, LE_ROLE_CENTRAL, PEER),
            ],
        );

        let result = device.dial_with_timeout(
            BdAddr::new(PEER),
            AddressType::Public,
            Some(Duration::from_millis(50)),
        );
        assert!(matches!(result, Err(GapError::Timeout)));
        assert_eq!(mock.command_count(cancel), 1);
        assert!(wait_until(WAIT, || !device.radio_flags().dialing));
        assert!(device.connections().is_empty());
    }

    #[test]
    fn test_failed_dial_reports_status() {
        let (mock, device) = device_rig();
        let create = le(OCF_LE_CREATE_CONNECTION);
        mock.reply_with(
            create,
            vec![
                command_status(create, HCI_SUCCESS),
                le_connection_complete(HCI_CONN_LIMIT_EXCEEDED, 0x0000, LE_ROLE_CENTRAL, PEER),
            ],
        );

        match device.dial_with_timeout(BdAddr::new(PEER), AddressType::Public, None) {
            Err(GapError::ConnectionFailed(status)) => assert_eq!(status, HCI_CONN_LIMIT_EXCEEDED),
            other => panic!("unexpected result: {:?}", other.map(|c| c.handle())),
        }
    }

    #[test]
    fn test_central_disconnect_while_listening_readvertises() {
        let (mock, device) = device_rig();
        let connected = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(Mutex::new(Vec::new()));
        {
            let connected = connected.clone();
            device.on_connect(move |conn| connected.lock().unwrap().push(conn.handle()));
            let disconnected = disconnected.clone();
            device.on_disconnect(move |conn, reason| {
                disconnected.lock().unwrap().push((conn.handle(), reason))
            });
        }

        // First central connects
        let acceptor = {
            let device = device.clone();
            thread::spawn(move || device.accept_with_timeout(None))
        };
        assert!(wait_until(WAIT, || device.radio_flags().listening));
        mock.push(le_connection_complete(HCI_SUCCESS, 0x0041, LE_ROLE_PERIPHERAL, PEER));
        let conn = acceptor.join().unwrap().unwrap();
        assert_eq!(conn.role(), Role::Peripheral);
        assert!(wait_until(WAIT, || !device.radio_flags().listening));
        assert!(wait_until(WAIT, || *connected.lock().unwrap() == vec![0x0041]));

        // Listen again, then lose the first central
        let acceptor = {
            let device = device.clone();
            thread::spawn(move || device.accept_with_timeout(Some(Duration::from_millis(500))))
        };
        assert!(wait_until(WAIT, || device.radio_flags().listening));
        assert_eq!(advertise_enables(&mock), vec![0x01, 0x01]);

        mock.push(disconnection_complete(0x0041, HCI_REMOTE_USER_TERMINATED));
        assert!(wait_until(WAIT, || advertise_enables(&mock).len() == 3));
        assert!(wait_until(WAIT, || {
            *disconnected.lock().unwrap() == vec![(0x0041, HCI_REMOTE_USER_TERMINATED)]
        }));

        // Timing out stops listening and disables advertising
        assert!(matches!(acceptor.join().unwrap(), Err(GapError::Timeout)));
        assert_eq!(advertise_enables(&mock), vec![0x01, 0x01, 0x01, 0x00]);
        assert!(!device.radio_flags().listening);
    }

    #[test]
    fn test_scan_delivers_reports() {
        let (mock, device) = device_rig();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            device
                .scan(move |adv: &Advertisement| seen.lock().unwrap().push(adv.clone()))
                .unwrap();
        }

        let mut params = vec![EVT_LE_ADVERTISING_REPORT, 1, ADV_IND, RANDOM_DEVICE_ADDRESS];
        params.extend_from_slice(&PEER);
        params.extend_from_slice(&[3, 0x02, 0x01, 0x06, 0xC4]);
        mock.push(event(EVT_LE_META_EVENT, &params));

        assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 1));
        let adv = seen.lock().unwrap()[0].clone();
        assert_eq!(adv.address, BdAddr::new(PEER));
        assert_eq!(adv.address_type, AddressType::Random);
        assert_eq!(adv.rssi, -60);
        assert_eq!(adv.data, vec![0x02, 0x01, 0x06]);
        assert!(adv.is_connectable());

        assert_eq!(device.stop_scanning().unwrap(), Outcome::Applied);
        assert!(!device.radio_flags().scanning);
        assert_eq!(device.stop_scanning().unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn test_close_fails_blocked_accept() {
        let (_mock, device) = device_rig();

        let acceptor = {
            let device = device.clone();
            thread::spawn(move || device.accept_with_timeout(None))
        };
        assert!(wait_until(WAIT, || device.radio_flags().listening));

        device.close();
        assert!(matches!(acceptor.join().unwrap(), Err(GapError::Closed)));
        assert!(matches!(device.advertise(), Err(GapError::Closed)));
    }

    #[test]
    fn test_random_static_addresses() {
        for _ in 0..32 {
            let addr = BdAddr::random_static();
            assert!(addr.is_static_random());
        }
        assert_eq!(
            BdAddr::new([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]).to_string(),
            "11:22:33:44:55:66"
        );
    }
}
