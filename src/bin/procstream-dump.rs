use procstream::{parse_number, Error, NativeMemory, RemoteMemoryStream};
use read_process_memory::Pid;
use std::io::{SeekFrom, Write};

const PAGE_SIZE: u64 = 4096;

#[cfg(any(target_os = "linux", windows))]
fn open(pid: Pid) -> RemoteMemoryStream<procstream::ProcessHandle> {
    let handle = procstream::ProcessHandle::open(pid).expect("could not open pid");
    RemoteMemoryStream::owned(handle, procstream::Access::Read)
}

#[cfg(not(any(target_os = "linux", windows)))]
fn open(
    pid: Pid,
) -> RemoteMemoryStream<procstream::CopyHandle<read_process_memory::ProcessHandle>> {
    let handle =
        read_process_memory::ProcessHandle::try_from(pid).expect("could not get handle from pid");
    RemoteMemoryStream::owned(procstream::CopyHandle::new(handle), procstream::Access::Read)
}

fn dump<H: NativeMemory>(stream: &mut RemoteMemoryStream<H>, start: u64, end: u64) {
    let mut buf = [0; PAGE_SIZE as usize];
    let mut stdout = std::io::stdout().lock();
    let mut addr = start;
    while addr < end {
        // Stop at page boundaries so one unmapped page only blanks itself.
        let len = (PAGE_SIZE - addr % PAGE_SIZE).min(end - addr);
        let page = &mut buf[..usize::try_from(len).unwrap()];
        stream.seek(SeekFrom::Start(addr)).unwrap();
        match stream.read(page) {
            Ok(_) => stdout.write_all(page).unwrap(),
            Err(err @ Error::MemoryAccess { .. }) => {
                log::debug!("{}", err);
                page.fill(0);
                stdout.write_all(page).unwrap();
            }
            Err(err) => panic!("{}", err),
        }
        addr += len;
    }
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let usage = "usage: procstream-dump PID START LEN";
    let pid: Pid = args
        .next()
        .expect(usage)
        .parse()
        .expect("could not parse pid");
    let start = parse_number(&args.next().expect(usage)).expect("could not parse start");
    let len = parse_number(&args.next().expect(usage)).expect("could not parse len");
    let end = start.checked_add(len).expect("range overflows the address space");

    let mut stream = open(pid);
    dump(&mut stream, start, end);
    stream.close().unwrap();
}
