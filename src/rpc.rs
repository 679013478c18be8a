//! Wire schema and transport for the sync protocol's two RPCs (spec.md
//! §4.2, §6). Plays the role of Go's `net/rpc` here: a synchronous,
//! one-call-per-connection exchange over `TcpStream`, length-prefixed
//! `bincode`.
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Error;
use crate::event::Event;

/// `GetNumberOfMissingEvents(knownHashgraphLengths)`: asks a peer how many
/// events per author it has beyond what the caller already knows.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetNumberOfMissingEventsRequest {
    /// Caller's `hashgraphLengths()`, keyed by author.
    pub known: Vec<(Address, usize)>,
}

/// Response to [`GetNumberOfMissingEventsRequest`]: `toSend[addr] =
/// known_A[addr] - len(Hashgraph_B[addr])` (spec.md §4.2 step 2), the
/// number of the caller's tail events the responder lacks for that
/// author. May be negative, meaning the responder is ahead on that
/// author; the caller ignores those on this direction (spec.md §4.2 step
/// 3, §6, §8 S5).
#[derive(Debug, Serialize, Deserialize)]
pub struct GetNumberOfMissingEventsResponse {
    /// Per-author `toSend` counts, in the same order as the request.
    pub missing: Vec<(Address, i64)>,
}

/// `SyncAllEvents(events)`: the caller pushes the events the responder is
/// missing; the responder appends them and, on the
/// responder-creates-new-event variant (spec.md §4.2 Open Question),
/// folds in a new self-event linking to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncAllEventsRequest {
    /// The calling node's address, used by the responder as the new
    /// event's other-parent author.
    pub caller: Address,
    /// Events the caller believes the responder is missing, in creation
    /// order per author.
    pub events: Vec<Event>,
}

/// Response to [`SyncAllEventsRequest`]: acknowledges how many events were
/// actually appended (duplicates and events with still-missing parents
/// are silently dropped, spec.md §7).
#[derive(Debug, Serialize, Deserialize)]
pub struct SyncAllEventsResponse {
    /// Number of events from the request that were newly appended.
    pub appended: usize,
}

/// One length-prefixed `bincode` message: a `u32` big-endian byte length
/// followed by the payload.
fn write_message<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<(), Error> {
    let payload = bincode::serialize(value)?;
    let len = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len)?;
    stream.write_all(&payload)?;
    Ok(())
}

fn read_message<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> Result<T, Error> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

/// One RPC method name, sent as the first frame of a connection so the
/// responder knows which handler to dispatch to (spec.md §6 "two RPCs").
#[derive(Debug, Serialize, Deserialize)]
enum Method {
    GetNumberOfMissingEvents,
    SyncAllEvents,
}

/// Blocking client for the two sync RPCs. One `TcpStream` per call,
/// mirroring the original's `rpc.Dial` / single `Call` / close pattern.
pub struct Client;

impl Client {
    /// Calls `GetNumberOfMissingEvents` on `peer`.
    pub fn get_number_of_missing_events(
        peer: &Address,
        request: GetNumberOfMissingEventsRequest,
    ) -> Result<GetNumberOfMissingEventsResponse, Error> {
        let mut stream = TcpStream::connect(peer.as_str())?;
        write_message(&mut stream, &Method::GetNumberOfMissingEvents)?;
        write_message(&mut stream, &request)?;
        read_message(&mut stream)
    }

    /// Calls `SyncAllEvents` on `peer`.
    pub fn sync_all_events(
        peer: &Address,
        request: SyncAllEventsRequest,
    ) -> Result<SyncAllEventsResponse, Error> {
        let mut stream = TcpStream::connect(peer.as_str())?;
        write_message(&mut stream, &Method::SyncAllEvents)?;
        write_message(&mut stream, &request)?;
        read_message(&mut stream)
    }
}

/// Dispatches one accepted connection to the matching handler. Callers
/// supply the two handlers as closures so this module stays ignorant of
/// `Store`/locking (spec.md §5: RPC handling must not hold the graph lock
/// across I/O).
pub fn serve_connection<G, S>(
    mut stream: TcpStream,
    handle_get_number_of_missing_events: G,
    handle_sync_all_events: S,
) -> Result<(), Error>
where
    G: FnOnce(GetNumberOfMissingEventsRequest) -> GetNumberOfMissingEventsResponse,
    S: FnOnce(SyncAllEventsRequest) -> SyncAllEventsResponse,
{
    let method: Method = read_message(&mut stream)?;
    match method {
        Method::GetNumberOfMissingEvents => {
            let request = read_message(&mut stream)?;
            let response = handle_get_number_of_missing_events(request);
            write_message(&mut stream, &response)
        }
        Method::SyncAllEvents => {
            let request = read_message(&mut stream)?;
            let response = handle_sync_all_events(request);
            write_message(&mut stream, &response)
        }
    }
}

/// Binds a listener on `addr`. Accepting and dispatching is driven by the
/// caller (`Node`), one `std::thread::spawn` per connection (spec.md §5).
pub fn bind(addr: &Address) -> Result<TcpListener, Error> {
    Ok(TcpListener::bind(addr.as_str())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn round_trips_get_number_of_missing_events_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_connection(
                stream,
                |req| GetNumberOfMissingEventsResponse {
                    missing: req
                        .known
                        .into_iter()
                        .map(|(a, n)| (a, n as i64 + 1))
                        .collect(),
                },
                |_req| SyncAllEventsResponse { appended: 0 },
            )
            .unwrap();
        });

        let peer = Address::new(addr.to_string());
        let response = Client::get_number_of_missing_events(
            &peer,
            GetNumberOfMissingEventsRequest {
                known: vec![(Address::new("127.0.0.1:9000"), 3)],
            },
        )
        .unwrap();

        server.join().unwrap();
        assert_eq!(response.missing, vec![(Address::new("127.0.0.1:9000"), 4)]);
    }
}
