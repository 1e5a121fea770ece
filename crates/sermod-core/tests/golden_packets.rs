use sermod_core::{
    crc16, decode, ExceptionCode, FunctionCode, ReadRequest, ResponseAssembler, ResponseError,
};

const READ_HOLDING_REQ: &[u8] = &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];

fn framed(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&crc16(body).to_le_bytes());
    frame
}

#[test]
fn read_request_golden_frames() {
    let holding = ReadRequest::new(1, FunctionCode::ReadHoldingRegisters, 0, 2).unwrap();
    assert_eq!(holding.encode().unwrap(), READ_HOLDING_REQ);

    let coils = ReadRequest::new(0x11, FunctionCode::ReadCoils, 0x0013, 0x0025).unwrap();
    let frame = coils.encode().unwrap();
    assert_eq!(&frame[..6], &[0x11, 0x01, 0x00, 0x13, 0x00, 0x25]);
    assert_eq!(&frame[6..], &crc16(&frame[..6]).to_le_bytes());

    let inputs = ReadRequest::new(1, FunctionCode::ReadInputRegisters, 0x0008, 0x0001).unwrap();
    assert_eq!(
        &inputs.encode().unwrap()[..6],
        &[0x01, 0x04, 0x00, 0x08, 0x00, 0x01]
    );

    let discrete = ReadRequest::new(1, FunctionCode::ReadDiscreteInputs, 0x00C4, 0x0016).unwrap();
    assert_eq!(
        &discrete.encode().unwrap()[..6],
        &[0x01, 0x02, 0x00, 0xC4, 0x00, 0x16]
    );
}

#[test]
fn fc03_response_decodes_17_and_34() {
    let request = ReadRequest::new(1, FunctionCode::ReadHoldingRegisters, 0, 2).unwrap();
    let response = framed(&[0x01, 0x03, 0x04, 0x00, 0x11, 0x00, 0x22]);

    let mut assembler = ResponseAssembler::new(&request);
    assembler.push(&response).unwrap();
    let payload = assembler.finish().unwrap();

    assert_eq!(decode::decode_registers(payload, 2), vec![17, 34]);
}

#[test]
fn exception_frame_golden() {
    let request = ReadRequest::new(1, FunctionCode::ReadHoldingRegisters, 0, 2).unwrap();
    let response = framed(&[0x01, 0x83, 0x02]);
    assert_eq!(response.len(), 5);

    let mut assembler = ResponseAssembler::new(&request);
    assembler.push(&response).unwrap();
    assert!(assembler.is_complete());

    match assembler.finish().unwrap_err() {
        ResponseError::Exception(code) => {
            assert_eq!(code, ExceptionCode::IllegalDataAddress);
            assert_eq!(code.label(), "Illegal Data Address");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn coil_response_length_follows_bit_count() {
    // 9 coils pack into 2 data bytes: 7-byte frame, not the register formula.
    let request = ReadRequest::new(1, FunctionCode::ReadCoils, 0, 9).unwrap();
    assert_eq!(request.expected_response_len(), 7);

    let response = framed(&[0x01, 0x01, 0x02, 0b1010_1010, 0b0000_0001]);
    let mut assembler = ResponseAssembler::new(&request);
    assembler.push(&response).unwrap();
    let payload = assembler.finish().unwrap();

    let coils = decode::decode_coils(payload, 9);
    assert_eq!(coils.len(), 9);
    assert!(!coils[0]);
    assert!(coils[1]);
    assert!(coils[8]);
}
