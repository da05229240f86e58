use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use sixp::network::{OutboundFrame, TxStatus};
use sixp::protocol::packet::{cell_request_body, get_cell_list, get_u8};
use sixp::protocol::{Cell, CellOptions, Field};
use sixp::{
    Code, Command, GenerationKind, InputEvent, LinkAddr, MessageType, ReturnCode,
    SchedulingFunction, SendStatus, Sixp, SixpConfig,
};

const SFID: u8 = 0xf1;

/// Accepts the first NumCells candidates of every ADD and keeps what was agreed
struct GreedySf {
    name: &'static str,
    schedule: Arc<Mutex<Vec<Cell>>>,
}

impl SchedulingFunction for GreedySf {
    fn sfid(&self) -> u8 {
        SFID
    }

    fn input(&mut self, sixp: &mut Sixp, event: InputEvent) {
        match event.msg_type {
            MessageType::Request if event.command == Command::Add => {
                let wanted = get_u8(Field::NumCells, event.msg_type, event.code, &event.body)
                    .unwrap_or(0) as usize;
                let candidates = get_cell_list(event.msg_type, event.code, &event.body)
                    .map(Cell::parse_list)
                    .unwrap_or_default();
                let accepted: Vec<Cell> = candidates.into_iter().take(wanted).collect();
                println!("[{}] ADD from {} for {} cell(s), accepting {:?}", self.name, event.peer, wanted, accepted);

                self.schedule.lock().unwrap().extend(&accepted);
                if let Err(e) = sixp.output(
                    MessageType::Response,
                    ReturnCode::Success,
                    SFID,
                    Bytes::from(Cell::encode_list(&accepted)),
                    event.peer,
                    None,
                ) {
                    eprintln!("[{}] cannot answer: {}", self.name, e);
                }
                let _ = sixp.advance_generation(event.peer, GenerationKind::Rx);
            }
            MessageType::Response if event.code == Code::Return(ReturnCode::Success) => {
                let cells = Cell::parse_list(&event.body);
                println!("[{}] {} agreed on {:?}", self.name, event.peer, cells);
                self.schedule.lock().unwrap().extend(&cells);
                let _ = sixp.advance_generation(event.peer, GenerationKind::Tx);
            }
            _ => println!("[{}] {:?} {:?} from {}", self.name, event.msg_type, event.code, event.peer),
        }
    }
}

/// Delivers everything queued for the MAC to the other engine
fn deliver(from: LinkAddr, rx: &mut mpsc::Receiver<OutboundFrame>, to: &mut Sixp) -> usize {
    let mut count = 0;
    while let Ok(frame) = rx.try_recv() {
        to.input_psdu(&frame.psdu, from);
        frame.completion.complete(TxStatus::Ok, 1);
        count += 1;
    }
    count
}

#[tokio::main]
async fn main() {
    sixp::util::init_logging(tracing::Level::INFO);

    let config = SixpConfig::default();
    println!("6P loopback between two nodes:");
    println!("- Neighbor table: {} entries", config.max_neighbors);
    println!("- Transaction pool: {} entries", config.max_transactions);
    println!("- Default timeout: {:?}", config.default_timeout);

    let a_addr = LinkAddr::from_short(0x0a);
    let b_addr = LinkAddr::from_short(0x0b);
    let (mut a, mut a_mac) = Sixp::with_channel(config.clone()).unwrap();
    let (mut b, mut b_mac) = Sixp::with_channel(config).unwrap();

    let a_cells = Arc::new(Mutex::new(Vec::new()));
    let b_cells = Arc::new(Mutex::new(Vec::new()));
    a.add_sf(Box::new(GreedySf {
        name: "A",
        schedule: a_cells.clone(),
    }))
    .unwrap();
    b.add_sf(Box::new(GreedySf {
        name: "B",
        schedule: b_cells.clone(),
    }))
    .unwrap();

    for round in 0..3u16 {
        let candidates: Vec<Cell> = (0..4).map(|i| Cell::new(10 * (round + 1) + i, i)).collect();
        let body = cell_request_body(Command::Add, 0, CellOptions::TX, 2, &candidates).unwrap();
        println!("\nRound {}: A proposes {:?}", round, candidates);
        a.output(
            MessageType::Request,
            Command::Add,
            SFID,
            body,
            b_addr,
            Some(Box::new(|_: &mut Sixp, dest: LinkAddr, status: SendStatus| {
                println!("[A] Request to {} sent: {:?}", dest, status);
            })),
        )
        .unwrap();

        loop {
            let moved = deliver(a_addr, &mut a_mac, &mut b) + deliver(b_addr, &mut b_mac, &mut a);
            a.poll(Instant::now());
            b.poll(Instant::now());
            let busy = a.transaction_count() + b.transaction_count() > 0;
            if moved == 0 && !busy {
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    println!("\nSchedule at A: {:?}", a_cells.lock().unwrap());
    println!("Schedule at B: {:?}", b_cells.lock().unwrap());
    if let Some(nbr) = a.neighbor(&b_addr) {
        println!("A's generations towards B: GTX={} GRX={}", nbr.gtx, nbr.grx);
    }
    if let Some(nbr) = b.neighbor(&a_addr) {
        println!("B's generations towards A: GTX={} GRX={}", nbr.gtx, nbr.grx);
    }
}
