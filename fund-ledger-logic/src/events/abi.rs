use alloy::sol;

sol! {
    interface IFundVault {
        #[derive(Debug, PartialEq, Eq)]
        event Deposit(address indexed sender, address indexed owner, uint256 assets, uint256 shares);

        #[derive(Debug, PartialEq, Eq)]
        event Withdraw(address indexed sender, address indexed receiver, address indexed owner, uint256 assets, uint256 shares);

        #[derive(Debug, PartialEq, Eq)]
        event RedeemRequested(uint256 indexed requestId, address indexed owner, address receiver, uint256 shares, uint256 assets);

        #[derive(Debug, PartialEq, Eq)]
        event RedeemProcessed(uint256 indexed requestId, address indexed owner, uint256 assets);

        #[derive(Debug, PartialEq, Eq)]
        event Transfer(address indexed from, address indexed to, uint256 value);

        #[derive(Debug, PartialEq, Eq)]
        event NavUpdated(uint256 nav, uint256 totalAssets, uint256 timestamp);

        #[derive(Debug, PartialEq, Eq)]
        event FeesCollected(address indexed recipient, uint256 managementFee, uint256 performanceFee);

        #[derive(Debug, PartialEq, Eq)]
        event Paused(address account);

        #[derive(Debug, PartialEq, Eq)]
        event Unpaused(address account);
    }
}
