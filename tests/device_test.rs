//! End-to-end device scenarios, driven through the stack without sockets.
//!
//! The harness emulates the transceiver's transmit thread with a pump that
//! captures every outbound cEMI frame and confirms it, and injects inbound
//! frames through the link layer's queue plus `run_once`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use knx_weave::protocol::{frame, Cemi, LData, Priority};
use knx_weave::{
    AccessMode, Condition, Device, Ets, FunctionalBlock, GadMap, GroupAddress, IndividualAddress,
    Notifier, Scheduler, Settings, TransmissionResult, Value,
};

struct Harness {
    ets: Arc<Ets>,
    device: Device,
    captured: Arc<Mutex<Vec<Vec<u8>>>>,
    pump: Option<std::thread::JoinHandle<()>>,
}

impl Harness {
    fn new(blocks: Vec<Arc<FunctionalBlock>>, map: &str) -> Self {
        let settings = Settings {
            confirm_timeout: Duration::from_millis(500),
            ..Settings::default()
        };
        let ets = Ets::new(GadMap::parse(map).unwrap(), Notifier::new());
        let device = Device::new(
            "test-device",
            IndividualAddress::new(1, 1, 1).unwrap(),
            settings,
            Arc::clone(&ets),
            Scheduler::new(),
        );
        for fb in blocks {
            device.add_block(fb).unwrap();
        }
        ets.register(&device).unwrap();
        ets.weave(&device).unwrap();

        // Emulate the transmit thread: capture and confirm
        let link = Arc::clone(device.stack().link());
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let pump = std::thread::spawn(move || {
            while let Some(tx) = link.get_out_frame() {
                sink.lock().unwrap().push(tx.frame().to_vec());
                tx.resolve(TransmissionResult::Ok);
            }
        });

        Self {
            ets,
            device,
            captured,
            pump: Some(pump),
        }
    }

    fn block(&self, name: &str) -> Arc<FunctionalBlock> {
        self.device.block(name).unwrap()
    }

    /// Inject an inbound frame and process it synchronously.
    fn inject(&self, cemi: Cemi) {
        self.device.stack().link().put_in_frame(cemi);
        assert!(self.device.stack().link().run_once());
    }

    /// Everything "sent on the wire" so far (encoded cEMI frames).
    fn sent(&self) -> Vec<Vec<u8>> {
        self.captured.lock().unwrap().clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.device.stack().stop();
        if let Some(pump) = self.pump.take() {
            pump.join().unwrap();
        }
    }
}

fn foreign_source() -> IndividualAddress {
    IndividualAddress::new(2, 2, 2).unwrap()
}

fn inbound_write(gad: GroupAddress, npdu: &[u8]) -> Cemi {
    Cemi::LDataInd(LData::group(foreign_source(), gad, Priority::Low, npdu).unwrap())
}

fn inbound_read(gad: GroupAddress) -> Cemi {
    Cemi::LDataInd(LData::group(foreign_source(), gad, Priority::Low, &[0x00, 0x00]).unwrap())
}

#[test]
fn test_temperature_write_wire_bytes() {
    // FB declares `temp` 9.001 with flags CWTU bound to 1/2/3;
    // setting 21.5 locally must produce the exact routing datagram.
    let fb = FunctionalBlock::builder("thermo")
        .datapoint("temp", "9.001", AccessMode::InOut, Value::Float(19.0))
        .group_object("temp", "CWTU", Priority::Low)
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "temp = 1/2/3\n");

    harness
        .block("thermo")
        .set_value("temp", Value::Float(21.5))
        .unwrap();

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    let expected_cemi = [
        0x11, 0x00, // L_Data.req, no additional info
        0xBC, 0xE0, // standard/no-repeat/broadcast/low, group/hop 6
        0x11, 0x01, // source 1.1.1
        0x0A, 0x03, // destination 1/2/3
        0x03, // NPDU length
        0x00, 0x80, // TPCI, APCI GroupValue_Write
        0x0C, 0x33, // 21.5 as KNX float16
    ];
    assert_eq!(sent[0].as_slice(), &expected_cemi);

    let datagram = frame::encode_routing_frame(&sent[0]).unwrap();
    assert_eq!(&datagram[..6], &[0x06, 0x10, 0x05, 0x30, 0x00, 0x13]);
}

#[test]
fn test_boolean_read_response() {
    // `door` 1.009 flags CRWU at 0/0/5, value Open (=1): an inbound read
    // must produce a response with APCI octet 0x41.
    let fb = FunctionalBlock::builder("entry")
        .datapoint("door", "1.009", AccessMode::InOut, Value::Bool(false))
        .group_object("door", "CRWU", Priority::Low)
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "door = 0/0/5\n");
    let gad = GroupAddress::new(0, 0, 5).unwrap();

    harness
        .block("entry")
        .set_value("door", Value::Bool(true))
        .unwrap();
    assert!(harness.sent().is_empty(), "no T flag, no transmit");

    harness.inject(inbound_read(gad));

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    let response = &sent[0];
    assert_eq!(response[0], 0x11, "goes out as a data request");
    assert_eq!(&response[6..8], &[0x00, 0x05], "answers on the asked GAD");
    assert_eq!(response[10], 0x41, "GroupValue_Response with data bit 1");
}

#[test]
fn test_flag_gating() {
    let build = |name: &str, flags: &str| {
        FunctionalBlock::builder(name)
            .datapoint("dp", "1.001", AccessMode::InOut, Value::Bool(false))
            .group_object("dp", flags, Priority::Low)
            .build()
            .unwrap()
    };

    // Without T: local change never transmits
    {
        let harness = Harness::new(vec![build("a", "CRWU")], "dp = 1/0/1\n");
        harness.block("a").set_value("dp", Value::Bool(true)).unwrap();
        assert!(harness.sent().is_empty());
    }

    // Without W: inbound write is ignored
    {
        let harness = Harness::new(vec![build("a", "CRTU")], "dp = 1/0/1\n");
        let gad = GroupAddress::new(1, 0, 1).unwrap();
        harness.inject(inbound_write(gad, &[0x00, 0x81]));
        assert_eq!(harness.block("a").value("dp").unwrap(), Value::Bool(false));
    }

    // Without R: inbound read is silently unanswered
    {
        let harness = Harness::new(vec![build("a", "CWTU")], "dp = 1/0/1\n");
        harness.inject(inbound_read(GroupAddress::new(1, 0, 1).unwrap()));
        assert!(harness.sent().is_empty());
    }

    // Without C: fully inert in every direction
    {
        let harness = Harness::new(vec![build("a", "RWTU")], "dp = 1/0/1\n");
        let gad = GroupAddress::new(1, 0, 1).unwrap();
        harness.inject(inbound_write(gad, &[0x00, 0x81]));
        harness.inject(inbound_read(gad));
        harness.block("a").set_value("dp", Value::Bool(true)).unwrap();
        assert_eq!(harness.block("a").value("dp").unwrap(), Value::Bool(true));
        assert!(harness.sent().is_empty());
    }
}

#[test]
fn test_update_flag_gates_responses() {
    let build = |flags: &str| {
        FunctionalBlock::builder("a")
            .datapoint("dp", "1.001", AccessMode::Input, Value::Bool(false))
            .group_object("dp", flags, Priority::Low)
            .build()
            .unwrap()
    };
    let gad = GroupAddress::new(1, 0, 1).unwrap();
    // APCI 0x41: GroupValue_Response carrying 1
    let response = Cemi::LDataInd(
        LData::group(foreign_source(), gad, Priority::Low, &[0x00, 0x41]).unwrap(),
    );

    let with_u = Harness::new(vec![build("CU")], "dp = 1/0/1\n");
    with_u.inject(response.clone());
    assert_eq!(with_u.block("a").value("dp").unwrap(), Value::Bool(true));

    let without_u = Harness::new(vec![build("CW")], "dp = 1/0/1\n");
    without_u.inject(response);
    assert_eq!(without_u.block("a").value("dp").unwrap(), Value::Bool(false));
}

#[test]
fn test_inbound_write_fans_out() {
    // Two datapoints in two blocks bound to the same GAD both update
    let a = FunctionalBlock::builder("a")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object_linked("x", "CW", Priority::Low, &["shared"])
        .build()
        .unwrap();
    let b = FunctionalBlock::builder("b")
        .datapoint("y", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object_linked("y", "CW", Priority::Low, &["shared"])
        .build()
        .unwrap();
    let harness = Harness::new(vec![a, b], "shared = 2/0/1\n");

    harness.inject(inbound_write(
        GroupAddress::new(2, 0, 1).unwrap(),
        &[0x00, 0x81],
    ));

    assert_eq!(harness.block("a").value("x").unwrap(), Value::Bool(true));
    assert_eq!(harness.block("b").value("y").unwrap(), Value::Bool(true));
}

#[test]
fn test_shared_datapoint_notifies_once() {
    // Two group objects on the same datapoint, both bound to the GAD:
    // one inbound write, one handler invocation.
    let fired = Arc::new(AtomicUsize::new(0));
    let fired2 = Arc::clone(&fired);
    let fb = FunctionalBlock::builder("a")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object_linked("x", "CW", Priority::Low, &["shared"])
        .group_object_linked("x", "CWU", Priority::Low, &["shared"])
        .on_datapoint("x", Condition::Always, move |_, _| {
            fired2.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "shared = 2/0/1\n");

    harness.inject(inbound_write(
        GroupAddress::new(2, 0, 1).unwrap(),
        &[0x00, 0x81],
    ));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_notification_conditions_over_the_bus() {
    let changes = Arc::new(AtomicUsize::new(0));
    let always = Arc::new(AtomicUsize::new(0));
    let c2 = Arc::clone(&changes);
    let a2 = Arc::clone(&always);
    let fb = FunctionalBlock::builder("a")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object("x", "CW", Priority::Low)
        .on_datapoint("x", Condition::Change, move |_, _| {
            c2.fetch_add(1, Ordering::SeqCst);
        })
        .on_datapoint("x", Condition::Always, move |_, _| {
            a2.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "x = 2/0/2\n");
    let gad = GroupAddress::new(2, 0, 2).unwrap();

    // Two identical writes: change fires on the first only
    harness.inject(inbound_write(gad, &[0x00, 0x81]));
    harness.inject(inbound_write(gad, &[0x00, 0x81]));

    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(always.load(Ordering::SeqCst), 2);
}

#[test]
fn test_panicking_handler_isolation() {
    let survivor = Arc::new(AtomicUsize::new(0));
    let s2 = Arc::clone(&survivor);
    let fb = FunctionalBlock::builder("a")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object("x", "CW", Priority::Low)
        .on_datapoint("x", Condition::Always, |_, _| panic!("handler bug"))
        .on_datapoint("x", Condition::Always, move |_, _| {
            s2.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "x = 2/0/3\n");

    harness.inject(inbound_write(
        GroupAddress::new(2, 0, 3).unwrap(),
        &[0x00, 0x81],
    ));
    assert_eq!(survivor.load(Ordering::SeqCst), 1);
}

#[test]
fn test_loop_suppression_end_to_end() {
    let fired = Arc::new(AtomicUsize::new(0));
    let f2 = Arc::clone(&fired);
    let fb = FunctionalBlock::builder("a")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object("x", "CW", Priority::Low)
        .on_datapoint("x", Condition::Always, move |_, _| {
            f2.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "x = 2/0/4\n");
    let gad = GroupAddress::new(2, 0, 4).unwrap();

    // Same frame, but sourced from the device's own address
    let own = Cemi::LDataInd(
        LData::group(
            IndividualAddress::new(1, 1, 1).unwrap(),
            gad,
            Priority::Low,
            &[0x00, 0x81],
        )
        .unwrap(),
    );
    harness.inject(own);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(harness.block("a").value("x").unwrap(), Value::Bool(false));
}

#[test]
fn test_register_rejects_duplicate_block_names() {
    let ets = Ets::new(GadMap::new(), Notifier::new());
    let device = Device::new(
        "dup",
        IndividualAddress::new(1, 1, 2).unwrap(),
        Settings::default(),
        Arc::clone(&ets),
        Scheduler::new(),
    );
    let fb = FunctionalBlock::builder("same")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .build()
        .unwrap();
    device.add_block(fb).unwrap();
    let fb2 = FunctionalBlock::builder("same")
        .datapoint("y", "1.001", AccessMode::Input, Value::Bool(false))
        .build()
        .unwrap();
    assert!(device.add_block(fb2).is_err());
}

#[test]
fn test_weave_rejects_unmapped_link() {
    let fb = FunctionalBlock::builder("a")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object("x", "CW", Priority::Low)
        .build()
        .unwrap();
    let ets = Ets::new(GadMap::new(), Notifier::new());
    let device = Device::new(
        "d",
        IndividualAddress::new(1, 1, 3).unwrap(),
        Settings::default(),
        Arc::clone(&ets),
        Scheduler::new(),
    );
    device.add_block(fb).unwrap();
    ets.register(&device).unwrap();
    assert!(ets.weave(&device).is_err());
}

#[test]
fn test_weave_is_idempotent() {
    let fb = FunctionalBlock::builder("a")
        .datapoint("x", "1.001", AccessMode::Input, Value::Bool(false))
        .group_object("x", "CW", Priority::Low)
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "x = 2/0/5\n");
    // A second weave of the same device is a no-op, not an error
    harness.ets.weave(&harness.device).unwrap();

    harness.inject(inbound_write(
        GroupAddress::new(2, 0, 5).unwrap(),
        &[0x00, 0x81],
    ));
    assert_eq!(harness.block("a").value("x").unwrap(), Value::Bool(true));
}

#[test]
fn test_groat_lists_bindings() {
    let fb = FunctionalBlock::builder("thermo")
        .datapoint("temp", "9.001", AccessMode::InOut, Value::Float(19.0))
        .group_object("temp", "CWTU", Priority::Low)
        .build()
        .unwrap();
    let harness = Harness::new(vec![fb], "temp = 1/2/3\n");
    let groat = harness.ets.groat(knx_weave::AddressStyle::ThreeLevel);
    assert!(groat.contains("1/2/3"));
    assert!(groat.contains("thermo.temp"));
    assert!(groat.contains("CWTU"));
    assert!(groat.contains("low"));
}
