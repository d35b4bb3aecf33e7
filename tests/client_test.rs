extern crate logix;

use logix::client::Client;
use logix::constant::*;
use logix::cpf;
use logix::eip::{Identity, Options};
use logix::error::Error;
use logix::transport::Transport;
use logix::value::PlcValue;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

// ---------- scripted transport ----------

#[derive(Default)]
struct Script {
    rr_replies: VecDeque<Vec<u8>>,
    unit_replies: VecDeque<Vec<u8>>,
    rr_log: Vec<Vec<u8>>,
    unit_log: Vec<Vec<u8>>,
}

#[derive(Clone, Default)]
struct MockTransport {
    script: Rc<RefCell<Script>>,
}

impl MockTransport {
    fn push_rr(&self, reply: Vec<u8>) {
        self.script.borrow_mut().rr_replies.push_back(reply);
    }

    fn push_unit(&self, reply: Vec<u8>) {
        self.script.borrow_mut().unit_replies.push_back(reply);
    }

    fn rr_requests(&self) -> Vec<Vec<u8>> {
        self.script.borrow().rr_log.clone()
    }

    fn unit_requests(&self) -> Vec<Vec<u8>> {
        self.script.borrow().unit_log.clone()
    }
}

impl Transport for MockTransport {
    fn register_session(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn send_rr_data(&mut self, frame: &[u8]) -> Result<Vec<u8>, Error> {
        let mut script = self.script.borrow_mut();
        script.rr_log.push(frame.to_vec());
        script
            .rr_replies
            .pop_front()
            .ok_or_else(|| Error::Protocol("mock: unexpected SendRRData".to_string()))
    }

    fn send_unit_data(&mut self, frame: &[u8]) -> Result<Vec<u8>, Error> {
        let mut script = self.script.borrow_mut();
        script.unit_log.push(frame.to_vec());
        script
            .unit_replies
            .pop_front()
            .ok_or_else(|| Error::Protocol("mock: unexpected SendUnitData".to_string()))
    }

    fn list_identity(&mut self) -> Result<Identity, Error> {
        Ok(identity_fixture())
    }

    fn close(&mut self) {}
}

fn identity_fixture() -> Identity {
    Identity {
        vendor_id: 0x0001,
        device_type: 0x000E,
        product_code: 0x0096,
        revision_major: 32,
        revision_minor: 11,
        status: 0x0060,
        serial_number: 0x00C0_FFEE,
        product_name: "1756-L83E/B".to_string(),
        ip: Ipv4Addr::new(192, 168, 1, 10),
        port: 44818,
    }
}

// ---------- wire fixture builders ----------

fn cip_reply(service: u8, status: u8, extended: &[u16], data: &[u8]) -> Vec<u8> {
    let mut out = vec![service | 0x80, 0x00, status, extended.len() as u8];
    for ext in extended {
        out.extend_from_slice(&ext.to_le_bytes());
    }
    out.extend_from_slice(data);
    out
}

fn rr_reply(cip: Vec<u8>) -> Vec<u8> {
    cpf::encode(&[cpf::Item::null_address(), cpf::Item::unconnected_data(cip)])
}

fn ucmm_reply(embedded: Vec<u8>) -> Vec<u8> {
    rr_reply(cip_reply(SVC_UNCONNECTED_SEND, 0x00, &[], &embedded))
}

fn unit_reply(connection_id: u32, sequence: u16, cip: Vec<u8>) -> Vec<u8> {
    let mut body = sequence.to_le_bytes().to_vec();
    body.extend_from_slice(&cip);
    cpf::encode(&[
        cpf::Item::connected_address(connection_id),
        cpf::Item::connected_data(body),
    ])
}

// embedded CIP request carried by an unconnected SendRRData frame
fn unconnected_request(frame: &[u8]) -> Vec<u8> {
    let items = cpf::decode(frame).unwrap();
    cpf::find(&items, CPF_UNCONNECTED_DATA).unwrap().data.clone()
}

fn connected_request(frame: &[u8]) -> (u16, Vec<u8>) {
    let items = cpf::decode(frame).unwrap();
    let data = &cpf::find(&items, CPF_CONNECTED_DATA).unwrap().data;
    (
        u16::from_le_bytes([data[0], data[1]]),
        data[2..].to_vec(),
    )
}

fn forward_open_reply(serial: u16) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&0x00BB_0001u32.to_le_bytes()); // O->T id
    data.extend_from_slice(&(0x0001_0000u32 | serial as u32).to_le_bytes()); // T->O id
    data.extend_from_slice(&serial.to_le_bytes());
    data.extend_from_slice(&VENDOR_ID.to_le_bytes());
    data.extend_from_slice(&ORIGINATOR_SERIAL.to_le_bytes());
    data.extend_from_slice(&RPI_MICROS.to_le_bytes()); // O->T API
    data.extend_from_slice(&RPI_MICROS.to_le_bytes()); // T->O API
    data.push(0x00); // application reply size
    data.push(0x00); // reserved
    data
}

fn symbol_entry(instance: u32, name: &str, type_code: u16, array_size: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&instance.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&type_code.to_le_bytes());
    out.extend_from_slice(&array_size.to_le_bytes());
    out.extend_from_slice(&[0u8; 10]);
    out
}

fn browse_reply(entries: &[Vec<u8>], status: u8) -> Vec<u8> {
    rr_reply(cip_reply(
        SVC_GET_INSTANCE_ATTRIBUTE_LIST,
        status,
        &[],
        &entries.concat(),
    ))
}

fn template_attrs_data(objdef: u32, size: u32, members: u16, handle: u16) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&4u16.to_le_bytes());
    for (id, value) in &[(4u16, objdef), (5, size)] {
        data.extend_from_slice(&id.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&value.to_le_bytes());
    }
    for (id, value) in &[(2u16, members), (1, handle)] {
        data.extend_from_slice(&id.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

fn member_record(array_count: u16, type_code: u16, offset: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&array_count.to_le_bytes());
    out.extend_from_slice(&type_code.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out
}

// "Outer" template 0x1F: Count DINT at 0, Inner (template 0x20) at 4.
// Padded so 4 * objdef - 23 * members - 2 lands exactly on the block.
fn outer_template_block() -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(&member_record(0, TYPE_DINT, 0));
    block.extend_from_slice(&member_record(0, 0x8020, 4));
    block.extend_from_slice(b"Outer\0Count\0Inner\0\0\0");
    assert_eq!(block.len(), 36); // objdef 21: 4*21 - 23*2 - 2
    block
}

// "Inner" template 0x20: A DINT at 0, B REAL at 4.
fn inner_template_block() -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(&member_record(0, TYPE_DINT, 0));
    block.extend_from_slice(&member_record(0, TYPE_REAL, 4));
    block.extend_from_slice(b"Inner\0A\0B\0\0\0");
    assert_eq!(block.len(), 28); // objdef 19
    block
}

// queue the four replies of a nested Outer/Inner template fetch
fn push_outer_template(mock: &MockTransport) {
    mock.push_rr(rr_reply(cip_reply(
        SVC_GET_ATTRIBUTE_LIST,
        0x00,
        &[],
        &template_attrs_data(21, 16, 2, 0x1111),
    )));
    mock.push_rr(rr_reply(cip_reply(0x4C, 0x00, &[], &outer_template_block())));
    mock.push_rr(rr_reply(cip_reply(
        SVC_GET_ATTRIBUTE_LIST,
        0x00,
        &[],
        &template_attrs_data(19, 8, 2, 0x2222),
    )));
    mock.push_rr(rr_reply(cip_reply(0x4C, 0x00, &[], &inner_template_block())));
}

fn outer_udt_payload() -> Vec<u8> {
    let mut data = vec![0xA0, 0x02, 0x11, 0x11]; // structure marker + handle
    data.extend_from_slice(&5i32.to_le_bytes()); // Count
    data.extend_from_slice(&7i32.to_le_bytes()); // Inner.A
    data.extend_from_slice(&1.5f32.to_le_bytes()); // Inner.B
    data.extend_from_slice(&[0u8; 4]); // pad
    data
}

fn msp_reply_data(replies: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&(replies.len() as u16).to_le_bytes());
    let mut offset = 2 + 2 * replies.len();
    for reply in replies {
        data.extend_from_slice(&(offset as u16).to_le_bytes());
        offset += reply.len();
    }
    for reply in replies {
        data.extend_from_slice(reply);
    }
    data
}

fn micro800_options() -> Options {
    Options::micro800(IpAddr::from(Ipv4Addr::LOCALHOST))
}

fn routed_options(slot: u8) -> Options {
    Options::new(IpAddr::from(Ipv4Addr::LOCALHOST), slot)
}

// ---------- scenarios ----------

#[test]
fn test_read_dint_direct() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(
        0x4C,
        0x00,
        &[],
        &[0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00],
    )));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    let values = client.read(&["Counter"]).unwrap();
    assert_eq!(values.len(), 1);
    let value = &values[0];
    assert!(value.is_ok());
    assert_eq!(value.type_code, TYPE_DINT);
    assert_eq!(value.bytes, vec![0x2A, 0x00, 0x00, 0x00]);
    assert_eq!(client.decode(value).unwrap(), PlcValue::Dint(42));

    // the request on the wire is a plain ReadTag of "Counter"
    let requests = mock.rr_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        unconnected_request(&requests[0]),
        vec![0x4C, 0x05, 0x91, 0x07, b'C', b'o', b'u', b'n', b't', b'e', b'r', 0x00, 0x01, 0x00]
    );
}

#[test]
fn test_read_routed_ucmm() {
    let mock = MockTransport::default();
    mock.push_rr(ucmm_reply(cip_reply(
        0x4C,
        0x00,
        &[],
        &[0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00],
    )));

    let mut opts = routed_options(3);
    opts.skip_forward_open = true;
    let mut client = Client::new(mock.clone(), &opts).unwrap();
    let values = client.read(&["Counter"]).unwrap();
    assert_eq!(client.decode(&values[0]).unwrap(), PlcValue::Dint(42));

    // the wire frame is an Unconnected_Send routing through slot 3
    let outer = unconnected_request(&mock.rr_requests()[0]);
    assert_eq!(outer[0], SVC_UNCONNECTED_SEND);
    assert_eq!(&outer[2..6], &[0x20, 0x06, 0x24, 0x01]); // Connection Manager
    assert_eq!(&outer[outer.len() - 2..], &[0x01, 0x03]); // route path
}

#[test]
fn test_programs_discovered() {
    let mock = MockTransport::default();
    mock.push_rr(browse_reply(
        &[
            symbol_entry(0x10, "Program:MainProgram", 0x1068, 0),
            symbol_entry(0x11, "Program:MainProgram.Counter", TYPE_DINT, 0),
            symbol_entry(0x12, "Counter", TYPE_DINT, 0),
        ],
        0x00,
    ));

    let mut client = Client::new(mock, &micro800_options()).unwrap();
    assert_eq!(client.programs().unwrap(), vec!["MainProgram".to_string()]);
}

#[test]
fn test_browse_pagination() {
    let mock = MockTransport::default();
    mock.push_rr(browse_reply(
        &[symbol_entry(0x01, "First", TYPE_DINT, 0)],
        STATUS_PARTIAL_TRANSFER,
    ));
    mock.push_rr(browse_reply(
        &[symbol_entry(0x07, "Second", TYPE_REAL, 0)],
        0x00,
    ));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    let tags = client.controller_tags().unwrap();
    assert_eq!(tags.len(), 2);

    // second page resumes at last_instance + 1
    let second = unconnected_request(&mock.rr_requests()[1]);
    assert_eq!(
        &second[..6],
        &[SVC_GET_INSTANCE_ATTRIBUTE_LIST, 0x02, 0x20, 0x6B, 0x24, 0x02]
    );
}

#[test]
fn test_forward_open_fallback_to_standard() {
    let mock = MockTransport::default();
    // large rejected with Invalid Connection Size, standard accepted
    mock.push_rr(rr_reply(cip_reply(SVC_LARGE_FORWARD_OPEN, 0x01, &[0x0109], &[])));
    mock.push_rr(rr_reply(cip_reply(
        SVC_FORWARD_OPEN,
        0x00,
        &[],
        &forward_open_reply(2),
    )));

    let mut client = Client::new(mock.clone(), &routed_options(0)).unwrap();
    let info = client.connection_info();
    assert!(info.connected);
    assert_eq!(info.size, PAYLOAD_STANDARD);

    let requests = mock.rr_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(unconnected_request(&requests[0])[0], SVC_LARGE_FORWARD_OPEN);
    assert_eq!(unconnected_request(&requests[1])[0], SVC_FORWARD_OPEN);

    // subsequent reads travel connected, sequence 1
    mock.push_unit(unit_reply(
        0x0001_0002,
        1,
        cip_reply(0x4C, 0x00, &[], &[0xC4, 0x00, 0x07, 0x00, 0x00, 0x00]),
    ));
    let values = client.read(&["Counter"]).unwrap();
    assert_eq!(client.decode(&values[0]).unwrap(), PlcValue::Dint(7));

    let (sequence, request) = connected_request(&mock.unit_requests()[0]);
    assert_eq!(sequence, 1);
    assert_eq!(request[0], 0x4C);
}

#[test]
fn test_large_forward_open_accepted() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(
        SVC_LARGE_FORWARD_OPEN,
        0x00,
        &[],
        &forward_open_reply(1),
    )));

    let client = Client::new(mock.clone(), &routed_options(0)).unwrap();
    let info = client.connection_info();
    assert!(info.connected);
    assert_eq!(info.size, PAYLOAD_LARGE);
    assert_eq!(mock.rr_requests().len(), 1);
}

#[test]
fn test_sequence_desync_drops_circuit() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(
        SVC_LARGE_FORWARD_OPEN,
        0x00,
        &[],
        &forward_open_reply(1),
    )));
    let mut client = Client::new(mock.clone(), &routed_options(0)).unwrap();
    assert!(client.connection_info().connected);

    // the reply echoes sequence 0 instead of the sent 1
    mock.push_unit(unit_reply(
        0x0001_0002,
        0,
        cip_reply(0x4C, 0x00, &[], &[0xC4, 0x00, 0x00, 0x00, 0x00, 0x00]),
    ));
    match client.read(&["Counter"]) {
        Err(Error::Protocol(reason)) => assert!(reason.contains("sequence")),
        other => panic!("expected a protocol error, got {:?}", other),
    }
    assert!(!client.connection_info().connected);
}

#[test]
fn test_msp_batch_keeps_slot_order() {
    let mock = MockTransport::default();
    let embedded = [
        cip_reply(0x4C, 0x00, &[], &[0xC4, 0x00, 0x01, 0x00, 0x00, 0x00]),
        cip_reply(0x4C, 0x05, &[0x0000], &[]),
        cip_reply(0x4C, 0x00, &[], &[0xC4, 0x00, 0x03, 0x00, 0x00, 0x00]),
    ];
    mock.push_rr(rr_reply(cip_reply(
        SVC_MULTIPLE_SERVICE,
        STATUS_EMBEDDED_SERVICE_ERROR,
        &[],
        &msp_reply_data(&embedded),
    )));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    let values = client.read(&["A", "B", "C"]).unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values[0].name, "A");
    assert_eq!(client.decode(&values[0]).unwrap(), PlcValue::Dint(1));
    assert_eq!(values[1].name, "B");
    let error = values[1].error.as_ref().unwrap();
    assert!(error.contains("tag not found"), "unexpected error {:?}", error);
    assert_eq!(values[2].name, "C");
    assert_eq!(client.decode(&values[2]).unwrap(), PlcValue::Dint(3));

    // one container on the wire, three embedded services
    let requests = mock.rr_requests();
    assert_eq!(requests.len(), 1);
    let container = unconnected_request(&requests[0]);
    assert_eq!(container[0], SVC_MULTIPLE_SERVICE);
    assert_eq!(&container[6..8], &[0x03, 0x00]);
}

#[test]
fn test_bad_tag_name_fails_slot_without_network() {
    let mock = MockTransport::default();
    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    let values = client.read(&["Bad Name"]).unwrap();
    assert_eq!(values.len(), 1);
    assert!(values[0].error.is_some());
    assert!(mock.rr_requests().is_empty());
}

#[test]
fn test_write_string_bytes() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(SVC_WRITE_TAG, 0x00, &[], &[])));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    client.write("Label", PlcValue::from("HELLO")).unwrap();

    let request = unconnected_request(&mock.rr_requests()[0]);
    assert_eq!(
        request,
        vec![
            0x4D, 0x04, 0x91, 0x05, b'L', b'a', b'b', b'e', b'l', 0x00, // path
            0xD0, 0x00, 0x01, 0x00, // STRING, one element
            0x05, 0x00, 0x00, 0x00, 0x48, 0x45, 0x4C, 0x4C, 0x4F,
        ]
    );
}

#[test]
fn test_write_uses_discovered_type() {
    let mock = MockTransport::default();
    mock.push_rr(browse_reply(
        &[symbol_entry(0x11, "Counter", TYPE_INT, 0)],
        0x00,
    ));
    mock.push_rr(rr_reply(cip_reply(SVC_WRITE_TAG, 0x00, &[], &[])));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    client.controller_tags().unwrap();
    // an i32 value lands on the discovered INT tag as two bytes
    client.write("Counter", PlcValue::Dint(300)).unwrap();

    let request = unconnected_request(&mock.rr_requests()[1]);
    let data = &request[request.len() - 6..];
    assert_eq!(data, &[0xC3, 0x00, 0x01, 0x00, 0x2C, 0x01]);
}

#[test]
fn test_write_udt_member_uses_template_type() {
    let mock = MockTransport::default();
    mock.push_rr(browse_reply(
        &[symbol_entry(0x30, "MyUdt", 0x801F, 0)],
        0x00,
    ));
    push_outer_template(&mock);
    mock.push_rr(rr_reply(cip_reply(SVC_WRITE_TAG, 0x00, &[], &[])));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    client.controller_tags().unwrap();
    // the member's type comes from walking Outer -> Inner -> A
    client.write("MyUdt.Inner.A", PlcValue::Dint(9)).unwrap();

    // browse, four template fetches, then the write itself
    let requests = mock.rr_requests();
    assert_eq!(requests.len(), 6);
    assert_eq!(
        unconnected_request(&requests[5]),
        vec![
            0x4D, 0x0A, // WriteTag, ten path words
            0x91, 0x05, b'M', b'y', b'U', b'd', b't', 0x00, //
            0x91, 0x05, b'I', b'n', b'n', b'e', b'r', 0x00, //
            0x91, 0x01, b'A', 0x00, //
            0xC4, 0x00, 0x01, 0x00, // DINT, one element
            0x09, 0x00, 0x00, 0x00,
        ]
    );
}

#[test]
fn test_write_rejected_status_surfaces() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(SVC_WRITE_TAG, 0x0F, &[], &[])));

    let mut client = Client::new(mock, &micro800_options()).unwrap();
    match client.write("Locked", PlcValue::Dint(1)) {
        Err(Error::Cip(status)) => assert_eq!(status.status, 0x0F),
        other => panic!("expected CIP status error, got {:?}", other),
    }
}

#[test]
fn test_udt_read_decodes_nested_and_caches_template() {
    let mock = MockTransport::default();
    mock.push_rr(browse_reply(
        &[symbol_entry(0x30, "MyUdt", 0x801F, 0)],
        0x00,
    ));
    push_outer_template(&mock);
    mock.push_rr(rr_reply(cip_reply(0x4C, 0x00, &[], &outer_udt_payload())));
    mock.push_rr(rr_reply(cip_reply(0x4C, 0x00, &[], &outer_udt_payload())));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    client.controller_tags().unwrap();

    let values = client.read(&["MyUdt"]).unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].type_code, 0x801F);
    assert_eq!(
        client.decode(&values[0]).unwrap(),
        PlcValue::Structure(vec![
            ("Count".to_string(), PlcValue::Dint(5)),
            (
                "Inner".to_string(),
                PlcValue::Structure(vec![
                    ("A".to_string(), PlcValue::Dint(7)),
                    ("B".to_string(), PlcValue::Real(1.5)),
                ])
            ),
        ])
    );

    // a second read reuses the cached templates: exactly one more request
    let before = mock.rr_requests().len();
    client.read(&["MyUdt"]).unwrap();
    assert_eq!(mock.rr_requests().len(), before + 1);

    // across both reads the Template object was fetched once per id
    let template_fetches = mock
        .rr_requests()
        .iter()
        .map(|frame| unconnected_request(frame))
        .filter(|request| request.len() > 3 && request[2] == 0x20 && request[3] == 0x6C)
        .count();
    assert_eq!(template_fetches, 4); // attrs + block, for Outer and Inner
}

#[test]
fn test_udt_expansion_fallback() {
    let mock = MockTransport::default();
    mock.push_rr(browse_reply(
        &[symbol_entry(0x30, "MyUdt", 0x801F, 0)],
        0x00,
    ));
    push_outer_template(&mock);
    // the whole-structure read is rejected outright
    mock.push_rr(rr_reply(cip_reply(0x4C, 0x05, &[0x0000], &[])));
    // the expanded leaves come back as one MSP
    let embedded = [
        cip_reply(0x4C, 0x00, &[], &[0xC4, 0x00, 0x05, 0x00, 0x00, 0x00]),
        cip_reply(0x4C, 0x00, &[], &[0xC4, 0x00, 0x07, 0x00, 0x00, 0x00]),
        cip_reply(0x4C, 0x00, &[], &{
            let mut d = vec![0xCA, 0x00];
            d.extend_from_slice(&1.5f32.to_le_bytes());
            d
        }),
    ];
    mock.push_rr(rr_reply(cip_reply(
        SVC_MULTIPLE_SERVICE,
        0x00,
        &[],
        &msp_reply_data(&embedded),
    )));

    let mut client = Client::new(mock, &micro800_options()).unwrap();
    client.controller_tags().unwrap();

    let values = client.read(&["MyUdt"]).unwrap();
    let names: Vec<&str> = values.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["MyUdt.Count", "MyUdt.Inner.A", "MyUdt.Inner.B"]);
    assert_eq!(client.decode(&values[0]).unwrap(), PlcValue::Dint(5));
    assert_eq!(client.decode(&values[2]).unwrap(), PlcValue::Real(1.5));
}

#[test]
fn test_large_array_chunked_recovery() {
    let real_chunk = |start: usize, count: usize| {
        let mut data = vec![0xCA, 0x00]; // REAL type prefix
        for i in start..start + count {
            data.extend_from_slice(&(i as f32).to_le_bytes());
        }
        data
    };

    let mock = MockTransport::default();
    mock.push_rr(browse_reply(
        &[symbol_entry(0x2F, "Vec", TYPE_REAL | 0x2000, 2000)],
        0x00,
    ));
    // whole read returns partial transfer with the first 120 elements
    mock.push_rr(rr_reply(cip_reply(
        0x4C,
        STATUS_PARTIAL_TRANSFER,
        &[],
        &real_chunk(0, 120),
    )));
    // 18 full chunks of 100, then the final 80
    let mut offset = 120;
    while offset < 2000 {
        let count = (2000 - offset).min(100);
        mock.push_rr(rr_reply(cip_reply(0x4C, 0x00, &[], &real_chunk(offset, count))));
        offset += count;
    }

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    client.controller_tags().unwrap();

    let values = client.read(&["Vec"]).unwrap();
    assert_eq!(values.len(), 1);
    let value = &values[0];
    assert!(value.is_ok());
    assert_eq!(value.bytes.len(), 8000);
    assert_eq!(value.element_count, 2000);

    match client.decode(value).unwrap() {
        PlcValue::Array(items) => {
            assert_eq!(items.len(), 2000);
            assert_eq!(items[0], PlcValue::Real(0.0));
            assert_eq!(items[1999], PlcValue::Real(1999.0));
        }
        other => panic!("expected array, got {:?}", other),
    }

    // the first recovery request uses explicit index syntax Vec[120]
    let requests = mock.rr_requests();
    assert_eq!(requests.len(), 1 + 1 + 19);
    assert_eq!(
        unconnected_request(&requests[2]),
        vec![0x4C, 0x04, 0x91, 0x03, b'V', b'e', b'c', 0x00, 0x28, 120, 100, 0x00]
    );
}

#[test]
fn test_keepalive_paths() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(
        SVC_LARGE_FORWARD_OPEN,
        0x00,
        &[],
        &forward_open_reply(1),
    )));
    let mut client = Client::new(mock.clone(), &routed_options(0)).unwrap();

    // service-not-supported still proves the circuit alive
    mock.push_unit(unit_reply(1, 1, cip_reply(SVC_NOP, 0x08, &[], &[])));
    client.keepalive().unwrap();

    // any other status kills the circuit
    mock.push_unit(unit_reply(1, 2, cip_reply(SVC_NOP, 0x05, &[], &[])));
    assert!(client.keepalive().is_err());
    assert!(!client.connection_info().connected);

    // unconnected keepalive is a no-op
    client.keepalive().unwrap();
    assert_eq!(mock.unit_requests().len(), 2);
}

#[test]
fn test_close_sends_forward_close() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(
        SVC_LARGE_FORWARD_OPEN,
        0x00,
        &[],
        &forward_open_reply(1),
    )));
    mock.push_rr(rr_reply(cip_reply(SVC_FORWARD_CLOSE, 0x00, &[], &[])));

    let mut client = Client::new(mock.clone(), &routed_options(0)).unwrap();
    client.close();
    assert!(!client.connection_info().connected);

    let requests = mock.rr_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(unconnected_request(&requests[1])[0], SVC_FORWARD_CLOSE);
}

#[test]
fn test_close_survives_forward_close_failure() {
    let mock = MockTransport::default();
    mock.push_rr(rr_reply(cip_reply(
        SVC_LARGE_FORWARD_OPEN,
        0x00,
        &[],
        &forward_open_reply(1),
    )));
    mock.push_rr(rr_reply(cip_reply(SVC_FORWARD_CLOSE, 0x01, &[0x0107], &[])));

    let mut client = Client::new(mock, &routed_options(0)).unwrap();
    client.close();
    assert!(!client.connection_info().connected);
}

#[test]
fn test_identity_over_session() {
    let mock = MockTransport::default();
    let mut client = Client::new(mock, &micro800_options()).unwrap();
    let identity = client.identity().unwrap();
    assert_eq!(identity.product_name, "1756-L83E/B");
    assert_eq!(identity.serial_number, 0x00C0_FFEE);
}

#[test]
fn test_read_with_count_fragmented() {
    let mock = MockTransport::default();
    // ReadTag partial, then two ReadTagFragmented legs
    let mut first = vec![0xC4, 0x00];
    for i in 0i32..3 {
        first.extend_from_slice(&i.to_le_bytes());
    }
    mock.push_rr(rr_reply(cip_reply(0x4C, STATUS_PARTIAL_TRANSFER, &[], &first)));
    mock.push_rr(rr_reply(cip_reply(0x52, STATUS_PARTIAL_TRANSFER, &[], &first)));
    let mut second = Vec::new();
    for i in 3i32..6 {
        second.extend_from_slice(&i.to_le_bytes());
    }
    mock.push_rr(rr_reply(cip_reply(0x52, 0x00, &[], &second)));

    let mut client = Client::new(mock.clone(), &micro800_options()).unwrap();
    let value = client.read_with_count("Counts", 6).unwrap();
    assert!(value.is_ok());
    assert_eq!(value.element_count, 6);
    assert_eq!(value.bytes.len(), 24);
    match client.decode(&value).unwrap() {
        PlcValue::Array(items) => {
            assert_eq!(items.len(), 6);
            assert_eq!(items[5], PlcValue::Dint(5));
        }
        other => panic!("expected array, got {:?}", other),
    }

    // the second fragment asks for the bytes already received
    let requests = mock.rr_requests();
    let fragment = unconnected_request(&requests[2]);
    assert_eq!(fragment[0], 0x52);
    let offset = u32::from_le_bytes([
        fragment[fragment.len() - 4],
        fragment[fragment.len() - 3],
        fragment[fragment.len() - 2],
        fragment[fragment.len() - 1],
    ]);
    assert_eq!(offset, 12);
}
