mod common;

use bo_tie_hci_usb::config::DriverConfig;
use bo_tie_hci_usb::hci::{HciId, PacketType};
use bo_tie_hci_usb::hooks::{Control, ControlReply};
use bo_tie_hci_usb::table::MAX_DEVICES;
use bo_tie_hci_usb::transactions::TransferKind;
use bo_tie_hci_usb::usb::{DeviceDescriptor, UsbDeviceId, REQUEST_TYPE_CLASS, REQUEST_TYPE_VENDOR};
use bo_tie_hci_usb::Error;
use common::*;

#[test]
fn attach_standard_device() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    assert_eq!(bed.bus.notified(), vec!["h2generic".to_string()]);

    let device = bed.attach(1);

    assert!(device.is_connected());
    assert!(!device.is_running());
    assert_eq!(device.name(), "bluetooth/h2generic/0");
    assert_eq!(bed.driver.publish_devices(), vec!["bluetooth/h2generic/0".to_string()]);

    let setup = device.setup().unwrap();

    assert_eq!(setup.interrupt_in.pipe, INTERRUPT_IN);
    assert_eq!(setup.bulk_in.pipe, BULK_IN);
    assert_eq!(setup.bulk_out.pipe, BULK_OUT);
    assert_eq!(setup.request_type, REQUEST_TYPE_CLASS);
}

#[test]
fn missing_interrupt_endpoint() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    bed.bus
        .plug(UsbDeviceId(1), generic_descriptor(), configuration(0, vec![bulk_in(), bulk_out()]));

    let result = bed.driver.device_added(UsbDeviceId(1));

    assert!(matches!(result, Err(Error::MissingEndpoints)));
    assert!(bed.driver.devices().is_empty());
    assert!(bed.driver.publish_devices().is_empty());
}

#[test]
fn unexpected_interface_number() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    bed.bus.plug(
        UsbDeviceId(1),
        generic_descriptor(),
        configuration(1, vec![interrupt_in(), bulk_in(), bulk_out()]),
    );

    let result = bed.driver.device_added(UsbDeviceId(1));

    assert!(matches!(result, Err(Error::UnexpectedInterface(1))));
    assert!(bed.driver.devices().is_empty());
}

#[test]
fn ignored_device() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    let descriptor = DeviceDescriptor {
        vendor_id: 0x0A5C,
        product_id: 0x2033,
        ..generic_descriptor()
    };

    bed.bus.plug(UsbDeviceId(1), descriptor, standard_configuration());

    assert!(matches!(bed.driver.device_added(UsbDeviceId(1)), Err(Error::NoDevice)));
    assert!(bed.driver.devices().is_empty());
}

#[test]
fn vendor_control_requests() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    let descriptor = DeviceDescriptor {
        vendor_id: 0x08FD,
        product_id: 0x0001,
        ..generic_descriptor()
    };

    bed.bus.plug(UsbDeviceId(4), descriptor, standard_configuration());

    let device = bed.driver.device_added(UsbDeviceId(4)).unwrap();

    assert_eq!(device.setup().unwrap().request_type, REQUEST_TYPE_VENDOR);

    let device = bed.driver.open(device.name()).unwrap();

    bed.driver
        .control(&device, Control::IssueCommand(vec![0x03, 0x0c, 0x00]))
        .unwrap();

    match bed.bus.sent().as_slice() {
        [(Target::Control(UsbDeviceId(4), request), data)] => {
            assert_eq!(request.request_type, REQUEST_TYPE_VENDOR);
            assert_eq!(request.request, 0);
            assert_eq!(request.length, 3);
            assert_eq!(data, &vec![0x03, 0x0c, 0x00]);
        }
        other => panic!("unexpected transfers {:?}", other),
    }
}

#[test]
fn device_table_capacity() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    let devices: Vec<_> = (0..MAX_DEVICES as u32).map(|id| bed.attach(id)).collect();

    bed.bus
        .plug(UsbDeviceId(100), generic_descriptor(), standard_configuration());

    assert!(matches!(bed.driver.device_added(UsbDeviceId(100)), Err(Error::TableFull)));
    assert_eq!(bed.driver.devices().len(), MAX_DEVICES);
    assert!(devices.iter().all(|device| bed.driver.devices().contains(device)));

    // unplug the sixth device
    bed.driver.device_removed(&devices[5]);

    assert!(bed.driver.free(&devices[5]));

    let replacement = bed.driver.device_added(UsbDeviceId(100)).unwrap();

    assert_eq!(replacement.name(), "bluetooth/h2generic/5");

    bed.bus
        .plug(UsbDeviceId(101), generic_descriptor(), standard_configuration());

    assert!(matches!(bed.driver.device_added(UsbDeviceId(101)), Err(Error::TableFull)));
}

#[test]
fn second_open_is_refused() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    let device = bed.attach_and_open(1);

    let hci_id = device.hci_id().unwrap();

    // keep a command queued
    bed.bus.reject_next(1);

    bed.driver
        .send_command(hci_id, Some(bo_tie_hci_usb::buffer::SnetBuffer::from_packet(&[0x03, 0x0c, 0x00])))
        .unwrap();

    assert_eq!(device.tx_queues().pending(PacketType::Command), 1);

    assert!(matches!(bed.driver.open(device.name()), Err(Error::AlreadyRunning)));

    assert!(device.is_running());
    assert_eq!(device.open_count(), 1);
    assert_eq!(device.tx_queues().pending(PacketType::Command), 1);
    assert_eq!(bed.bus.queued(TransferKind::EventRx), 1);
}

#[test]
fn open_unknown_name() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    bed.attach(1);

    assert!(matches!(bed.driver.open("bluetooth/h2generic/9"), Err(Error::NotFound)));
}

#[test]
fn open_without_stack_uses_slot() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    bed.attach(1);

    let second = bed.attach_and_open(2);

    assert_eq!(second.hci_id(), Some(HciId(1)));
    assert_eq!(
        bed.driver.control(&second, Control::GetHciId).unwrap(),
        ControlReply::HciId(HciId(1))
    );
}

#[test]
fn open_registers_with_stack() {
    let (bed, _receiver) = TestBed::with_channel_stack(DriverConfig::default());

    bed.attach(1);
    bed.attach(2);

    let second = bed.driver.open("bluetooth/h2generic/1").unwrap();

    // the stack assigns identifiers in registration order
    assert_eq!(second.hci_id(), Some(HciId(0)));

    bed.driver.close(&second);

    assert_eq!(second.hci_id(), None);
    assert!(matches!(bed.driver.control(&second, Control::GetHciId), Err(Error::NotReady)));
}

#[test]
fn removal_cancels_and_keeps_record() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    let device = bed.attach_and_open(1);

    assert_eq!(bed.bus.queued_on(INTERRUPT_IN), 1);
    assert_eq!(bed.bus.queued_on(BULK_IN), 1);

    bed.driver.device_removed(&device);

    assert!(!device.is_connected());
    assert!(!device.is_running());
    assert_eq!(bed.bus.cancelled(), vec![INTERRUPT_IN, BULK_IN, BULK_OUT]);
    assert_eq!(bed.bus.queued_on(INTERRUPT_IN), 0);
    assert_eq!(bed.bus.queued_on(BULK_IN), 0);

    // cancelled receive transfers are not queued again
    assert_eq!(device.statistics().accepted_rx, 2);

    assert!(bed.driver.devices().contains(&device));
    assert!(matches!(bed.driver.open(device.name()), Err(Error::NoDevice)));

    assert!(bed.driver.free(&device));
    assert!(bed.driver.devices().is_empty());
}

#[test]
fn free_while_connected() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    let device = bed.attach(1);

    assert!(!bed.driver.free(&device));
    assert!(bed.driver.devices().contains(&device));
}

#[test]
fn close_then_reopen() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    let device = bed.attach_and_open(1);

    bed.driver.close(&device);

    assert!(!device.is_running());
    assert_eq!(device.open_count(), 0);

    let device = bed.driver.open(device.name()).unwrap();

    assert!(device.is_running());
    assert_eq!(device.open_count(), 1);
}

#[test]
fn uninit_drops_devices() {
    let bed = TestBed::new(None, None, DriverConfig::default());

    bed.attach(1);
    bed.attach(2);

    bed.driver.uninit_driver();

    assert!(bed.driver.devices().is_empty());
    assert!(bed.bus.notified().is_empty());
}
