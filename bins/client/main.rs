use price_relay::config::{EnvFile, SOCKET_HOST, SOCKET_PORT, resolve_address};
use price_relay::errors::{CliError, ProductIdError};
use price_relay::framing::{FrameReader, Framing};
use price_relay::product_id::ProductId;
use std::io::{self, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use structopt::StructOpt;

/// Command-line options for the client
#[derive(Debug, StructOpt)]
#[structopt(
    name = "price_relay_client",
    about = "Subscribes to price updates for one product"
)]
struct Opt {
    /// Product ID to watch (digits only)
    product_id: Option<String>,

    /// Relay server address, e.g., 127.0.0.1:8050 (overrides host/port)
    #[structopt(short, long)]
    server_addr: Option<String>,

    /// Relay server host
    #[structopt(long, env = "SOCKET_HOST")]
    socket_host: Option<String>,

    /// Relay server port
    #[structopt(long, env = "SOCKET_PORT")]
    socket_port: Option<String>,

    /// Env file with KEY=VALUE settings (defaults to ./.env when present)
    #[structopt(long, parse(from_os_str))]
    env_file: Option<PathBuf>,

    /// Message framing used by the server: newline, length, raw
    #[structopt(long, default_value = "newline")]
    framing: Framing,
}

fn print_usage() {
    println!("Please enter a valid product ID (must be a number)");
    println!("Example: price_relay_client 5");
}

/// Validates the product id argument.
///
/// The server reads the identifier with a single bounded read, so an id
/// that does not fit in it is refused here instead of being cut short.
fn parse_product_id(arg: &str) -> Result<ProductId, ProductIdError> {
    ProductId::from_wire(arg.trim().as_bytes())
}

/// Resolves the relay address from flags, environment or env file
fn server_addr(opt: &Opt) -> Result<String, CliError> {
    if let Some(addr) = &opt.server_addr {
        return Ok(addr.clone());
    }
    let env_file = EnvFile::discover(opt.env_file.as_deref())?;
    let (host, port) = resolve_address(
        SOCKET_HOST,
        SOCKET_PORT,
        opt.socket_host.clone(),
        opt.socket_port.clone(),
        env_file.as_ref(),
    )?;
    Ok(format!("{}:{}", host, port))
}

/// Sends the product id and prints every update until the server closes
fn watch(addr: &str, product_id: &ProductId, framing: Framing) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    println!("Connected to {}", addr);

    println!("Sending ProductID {:?}", product_id.as_str());
    stream.write_all(product_id.as_str().as_bytes())?;
    stream.flush()?;

    let mut reader = FrameReader::new(stream, framing);
    while let Some(frame) = reader.read_frame()? {
        println!("Received {}", String::from_utf8_lossy(&frame));
    }
    Ok(())
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();

    let product_id = match opt.product_id.as_deref().map(parse_product_id) {
        Some(Ok(id)) => id,
        Some(Err(e @ ProductIdError::TooLong(_))) => {
            println!("Invalid product ID: {}", e);
            print_usage();
            return Ok(());
        }
        _ => {
            print_usage();
            return Ok(());
        }
    };

    let addr = server_addr(&opt)?;
    let result = watch(&addr, &product_id, opt.framing);
    println!("Closing socket");
    result.map_err(CliError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_connect_to_missing_server_fails() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let id = ProductId::parse("5").unwrap();
        assert!(watch(&format!("127.0.0.1:{}", port), &id, Framing::Newline).is_err());
    }

    #[test]
    fn test_watch_sends_id_and_reads_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(b"{\"purchaseprice\":1,\"saleprice\":2}\n").unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let id = ProductId::parse("12").unwrap();
        watch(&addr, &id, Framing::Newline).unwrap();
        assert_eq!(server.join().unwrap(), "12");
    }

    #[test]
    fn test_product_id_must_fit_one_read() {
        assert_eq!(parse_product_id(" 42 ").unwrap().as_str(), "42");
        assert_eq!(
            parse_product_id("1234567890123456").unwrap().as_str(),
            "1234567890123456"
        );
        assert!(matches!(
            parse_product_id("12345678901234567"),
            Err(ProductIdError::TooLong(16))
        ));
        assert!(matches!(
            parse_product_id("4a"),
            Err(ProductIdError::NonDigit(_))
        ));
    }

    #[test]
    fn test_explicit_server_addr_wins() {
        let opt = Opt::from_iter(vec!["price_relay_client", "5", "-s", "10.0.0.1:9000"]);
        assert_eq!(server_addr(&opt).unwrap(), "10.0.0.1:9000");
        assert_eq!(opt.product_id.as_deref(), Some("5"));
    }
}
