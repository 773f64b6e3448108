use std::sync::{Arc, Mutex};

use genstream::stream::{SseDecoder, SseEvent, SseOptions, SseParser};

const TRANSCRIPT: &str = concat!(
    ": stream opened\n",
    "event: message_start\nid: 1\ndata: {\"type\":\"message_start\"}\n\n",
    "data: {\"delta\":\"Hel\"}\n\n",
    "event: ping\n\n",
    "data: {\"delta\":\"lo \"}\ndata: {\"delta\":\"wörld 🚀\"}\n\n",
    "retry: 3000\ndata: [DONE]\n\n",
);

fn decode_in_pieces(pieces: &[&str]) -> Vec<SseEvent> {
    let mut decoder = SseDecoder::new();
    let mut out = Vec::new();
    for piece in pieces {
        decoder.feed_into(piece, &mut out).unwrap();
    }
    decoder.finish_into(&mut out);
    out
}

fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

#[test]
fn every_two_way_split_matches_whole_input() {
    let whole = decode_in_pieces(&[TRANSCRIPT]);
    assert_eq!(whole.len(), 4);

    for split in char_boundaries(TRANSCRIPT) {
        let (head, tail) = TRANSCRIPT.split_at(split);
        assert_eq!(decode_in_pieces(&[head, tail]), whole, "split at {split}");
    }
}

#[test]
fn char_by_char_feeding_matches_whole_input() {
    let whole = decode_in_pieces(&[TRANSCRIPT]);
    let pieces: Vec<String> = TRANSCRIPT.chars().map(String::from).collect();
    let pieces: Vec<&str> = pieces.iter().map(String::as_str).collect();
    assert_eq!(decode_in_pieces(&pieces), whole);
}

#[test]
fn crlf_split_across_every_boundary() {
    let input = "event: a\r\ndata: one\r\n\r\nid: 9\r\ndata: two\r\n\r\n";
    let decode = |pieces: &[&str]| {
        let mut decoder = SseDecoder::with_options(&SseOptions::crlf());
        let mut out = Vec::new();
        for piece in pieces {
            decoder.feed_into(piece, &mut out).unwrap();
        }
        out
    };
    let whole = decode(&[input]);
    assert_eq!(whole.len(), 2);
    assert_eq!(whole[1].id.as_deref(), Some("9"));
    for split in 0..=input.len() {
        let (head, tail) = input.split_at(split);
        assert_eq!(decode(&[head, tail]), whole, "split at {split}");
    }
}

#[test]
fn fields_are_parsed_and_event_only_records_are_skipped() {
    let events = decode_in_pieces(&["event: message\nid: 42\ndata: {\"a\":1}\n\nevent: ping\n\n"]);
    assert_eq!(
        events,
        vec![SseEvent {
            event: Some("message".into()),
            data: "{\"a\":1}".into(),
            id: Some("42".into()),
            retry: None,
        }]
    );
}

#[test]
fn parser_instances_are_independent() {
    let first_seen = Arc::new(Mutex::new(Vec::new()));
    let second_seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&first_seen);
    let mut first = SseParser::new(move |event| {
        sink.lock().unwrap().push(event.data);
        Ok(())
    });
    let sink = Arc::clone(&second_seen);
    let mut second = SseParser::new(move |event| {
        sink.lock().unwrap().push(event.data);
        Ok(())
    });

    first.feed("data: one");
    second.feed("data: two\n\n");
    first.reset();
    first.feed("data: three\n\n");

    assert_eq!(*first_seen.lock().unwrap(), vec!["three"]);
    assert_eq!(*second_seen.lock().unwrap(), vec!["two"]);
}

#[test]
fn end_flushes_and_signals_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let end_log = Arc::clone(&seen);
    let mut parser = SseParser::new(move |event| {
        sink.lock().unwrap().push(event.data);
        Ok(())
    })
    .on_end(move || end_log.lock().unwrap().push("<end>".to_string()));

    parser.feed("data: a\n\ndata: b");
    parser.end();
    parser.end();
    assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "<end>"]);
}
