/// quick start - issue a loan, let it run late, collect fees and settle
use chrono::{Duration, TimeZone, Utc};
use loan_ledger::{
    LedgerConfig, LoanLedger, LoanRequest, MemoryLedger, Money, NewClient, SafeTimeProvider,
    TimeSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();
    let ledger = LoanLedger::new(MemoryLedger::new(), LedgerConfig::default(), &time)?;

    let client = ledger.register_client(NewClient::new("Ana Ruiz", "Calle Mayor 3", "555-0101"))?;
    let loan = ledger.issue_loan(LoanRequest::new(client.id, Money::from_major(1_000)))?;
    println!("loan {} due {}", loan.id, loan.due_date.format("%Y-%m-%d"));

    // one day past due: the monthly fee lands
    controller.advance(Duration::days(31));
    let report = ledger.accrue()?;
    println!("charged {} across {} loan(s)", report.total_charged(), report.loans.len());

    // a day later the unpaid fee draws a penalty
    controller.advance(Duration::days(1));
    ledger.accrue()?;
    for active in ledger.active_loans()? {
        println!("{} owes {}", active.client_name, active.total_owed);
    }

    if let Err(err) = ledger.pay_loan(loan.id) {
        println!("cannot settle yet: {err}");
    }
    for fee in ledger.fees(loan.id)? {
        ledger.pay_fee(fee.id)?;
    }
    let settlement = ledger.pay_loan(loan.id)?;
    println!("settled: {}", settlement.newly_settled());

    let balance = ledger.yearly_balance(2024)?;
    println!("{}", serde_json::to_string_pretty(&balance)?);

    Ok(())
}
